//! Error types for wxkit operations.
//!
//! Cryptographic failures are surfaced as dedicated variants so callers can
//! tell a misconfigured key apart from a tampered payload or a platform
//! that refused the request.

use std::fmt;

/// Stable numeric codes for each error kind, for logs and service responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WxkitErrorCode {
    /// Key material or configuration missing or undecodable
    Configuration = 1000,
    /// Symmetric decryption failed
    Decryption = 2000,
    /// Tag or signature check failed
    Authentication = 3000,
    /// Platform response lacked the expected success field
    UpstreamRejection = 4000,
    /// Non-2xx HTTP status
    Http = 4001,
    /// Transport/network layer error
    Transport = 5000,
    /// Connection failed
    ConnectionFailed = 5001,
    /// Connection timeout
    ConnectionTimeout = 5002,
    /// Invalid request/data
    InvalidData = 6000,
    /// Serialization error
    Serialization = 6001,
    /// Local filesystem error
    Io = 7000,
}

/// Error type for every wxkit operation.
#[derive(Debug)]
pub enum WxkitError {
    /// Key material missing, unreadable, or undecodable.
    Configuration {
        /// Configuration field at fault
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Ciphertext could not be decrypted or its envelope is malformed.
    Decryption(String),

    /// AEAD tag mismatch or a signature the caller treats as fatal.
    Authentication(String),

    /// The platform answered without the expected success indicator.
    UpstreamRejection {
        /// Operation that was rejected
        operation: String,
        /// Raw response body
        body: serde_json::Value,
    },

    /// The platform answered with a non-success HTTP status.
    Http {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Transport/network layer error.
    Transport(String),

    /// Connection failed.
    ConnectionFailed {
        /// Target endpoint
        target: String,
        /// Underlying error message
        reason: String,
    },

    /// Connection timeout.
    ConnectionTimeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid data provided.
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Serialization/deserialization error.
    Serialization(String),

    /// Local file I/O error.
    Io(String),
}

impl WxkitError {
    /// Get the error code.
    pub fn code(&self) -> WxkitErrorCode {
        match self {
            Self::Configuration { .. } => WxkitErrorCode::Configuration,
            Self::Decryption(_) => WxkitErrorCode::Decryption,
            Self::Authentication(_) => WxkitErrorCode::Authentication,
            Self::UpstreamRejection { .. } => WxkitErrorCode::UpstreamRejection,
            Self::Http { .. } => WxkitErrorCode::Http,
            Self::Transport(_) => WxkitErrorCode::Transport,
            Self::ConnectionFailed { .. } => WxkitErrorCode::ConnectionFailed,
            Self::ConnectionTimeout { .. } => WxkitErrorCode::ConnectionTimeout,
            Self::InvalidData { .. } => WxkitErrorCode::InvalidData,
            Self::Serialization(_) => WxkitErrorCode::Serialization,
            Self::Io(_) => WxkitErrorCode::Io,
        }
    }

    /// Get the error message as an owned String.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns true if a caller could reasonably retry the operation.
    ///
    /// The library itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. } => {
                true
            }
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Create a configuration error.
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream rejection carrying the raw response.
    pub fn upstream_rejection(operation: impl Into<String>, body: serde_json::Value) -> Self {
        Self::UpstreamRejection {
            operation: operation.into(),
            body,
        }
    }

    /// The raw response body of an upstream rejection, if this is one.
    pub fn rejected_body(&self) -> Option<&serde_json::Value> {
        match self {
            Self::UpstreamRejection { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl fmt::Display for WxkitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { field, reason } => {
                write!(f, "configuration error in {}: {}", field, reason)
            }
            Self::Decryption(msg) => write!(f, "decryption failed: {}", msg),
            Self::Authentication(msg) => write!(f, "authentication failed: {}", msg),
            Self::UpstreamRejection { operation, body } => {
                write!(f, "{} rejected by platform: {}", operation, body)
            }
            Self::Http { status, body } => write!(f, "http status {}: {}", status, body),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::ConnectionFailed { target, reason } => {
                write!(f, "connection to {} failed: {}", target, reason)
            }
            Self::ConnectionTimeout {
                operation,
                timeout_ms,
            } => {
                write!(f, "{} timed out after {}ms", operation, timeout_ms)
            }
            Self::InvalidData { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for WxkitError {}

impl From<serde_json::Error> for WxkitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WxkitError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = WxkitError::Decryption("bad block".to_string());
        assert_eq!(err.code(), WxkitErrorCode::Decryption);
        assert!(!err.is_retryable());

        let err = WxkitError::ConnectionTimeout {
            operation: "POST /v3/pay/transactions/jsapi".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(err.code(), WxkitErrorCode::ConnectionTimeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_http_retryable_only_for_server_side() {
        let server = WxkitError::Http {
            status: 502,
            body: String::new(),
        };
        let client = WxkitError::Http {
            status: 400,
            body: String::new(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }

    #[test]
    fn test_upstream_rejection_keeps_body() {
        let body = serde_json::json!({ "code": "PARAM_ERROR", "message": "bad openid" });
        let err = WxkitError::upstream_rejection("unified_order", body.clone());

        assert_eq!(err.code(), WxkitErrorCode::UpstreamRejection);
        assert_eq!(err.rejected_body(), Some(&body));
        assert!(err.to_string().contains("PARAM_ERROR"));
    }

    #[test]
    fn test_helper_constructors() {
        let err = WxkitError::configuration("private_key", "missing");
        assert_eq!(err.code(), WxkitErrorCode::Configuration);
        assert!(err.to_string().contains("private_key"));

        let err = WxkitError::invalid_data("nonce", "must be 12 bytes");
        assert_eq!(err.code(), WxkitErrorCode::InvalidData);
    }
}
