//! WeChat platform security layer.
//!
//! Two independent halves share one error type and one transport seam:
//!
//! - **Message codec** ([`message`]): the official-account encrypted message
//!   envelope (AES-256-CBC, SHA-1 signatures, XML payloads)
//! - **Payment signer** ([`pay`]): API v3 request signing, callback
//!   verification, AES-256-GCM resource decryption and the payment client
//!
//! Network access goes through [`transport::HttpTransport`], so the payment
//! client can run over the bundled reqwest transport or any other.
//!
//! # Example
//!
//! ```ignore
//! use wxkit_lib::config::MessageConfig;
//! use wxkit_lib::message::MessageCodec;
//!
//! let codec = MessageCodec::new(&MessageConfig::new(app_id, token, aes_key))?;
//! let xml = codec.open(&msg_signature, &timestamp, &nonce, &encrypt)?;
//! let reply = codec.encrypt_reply("<xml>...</xml>")?;
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod errors;
pub mod message;
pub mod pay;
pub mod prelude;
pub mod transport;

/// Test utilities: fixture keys and a recording transport.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{WxkitError, WxkitErrorCode};

/// Common result alias for wxkit operations.
pub type Result<T> = std::result::Result<T, WxkitError>;

/// Current Unix time in seconds, rounded up.
///
/// A clock before the epoch reads as zero.
pub(crate) fn unix_timestamp() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    millis.div_ceil(1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp_is_seconds() {
        let now = unix_timestamp();
        let floor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        // within one second of the floored clock
        assert!(now + 1 >= floor && now <= floor + 2);
        assert_eq!(now.to_string().len(), 10);
    }
}
