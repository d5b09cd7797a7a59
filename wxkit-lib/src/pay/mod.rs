//! Payment API v3: request signing, notification handling and the client.
//!
//! Requests are authenticated with `WECHATPAY2-SHA256-RSA2048` signatures over
//! a canonical string of method, URL, timestamp, nonce and body. Callbacks are
//! verified against the platform public key, and their encrypted resources
//! are opened with the merchant's API v3 key.

pub mod client;
pub mod keys;
pub mod signer;
pub mod types;

pub use client::WxPayClient;
pub use keys::KeyStore;
pub use signer::{build_canonical_string, generate_nonce, PaySigner, PrepaySignature, AUTH_SCHEME};
pub use types::*;
