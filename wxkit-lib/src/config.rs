//! Configuration types for the payment client, the message codec and the
//! HTTP transport.
//!
//! All secrets are supplied by the caller at construction time. Nothing is
//! read from ambient globals except through the explicit `*_from_env`
//! loaders.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default base URL of the payment API.
pub const DEFAULT_PAY_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Default base URL of the official-account API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.weixin.qq.com";

/// Where a piece of key material comes from.
///
/// Resolved once when the configuration is built: an absolute path means
/// the key lives on disk, anything else is the key itself.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum KeySource {
    /// PEM file to be read on first use.
    FilePath(PathBuf),
    /// PEM text supplied inline.
    Literal(String),
}

impl KeySource {
    /// Classify a configured string as a path or a literal key.
    pub fn detect(value: impl Into<String>) -> Self {
        let value = value.into();
        if Path::new(&value).is_absolute() {
            Self::FilePath(PathBuf::from(value))
        } else {
            Self::Literal(value)
        }
    }

    /// Source backed by a file on disk, regardless of path shape.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::FilePath(path.into())
    }

    /// Source holding the PEM text directly.
    pub fn literal(pem: impl Into<String>) -> Self {
        Self::Literal(pem.into())
    }

    /// True when no key material was configured at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::FilePath(path) => path.as_os_str().is_empty(),
            Self::Literal(pem) => pem.trim().is_empty(),
        }
    }
}

impl Default for KeySource {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

impl From<String> for KeySource {
    fn from(value: String) -> Self {
        Self::detect(value)
    }
}

impl From<&str> for KeySource {
    fn from(value: &str) -> Self {
        Self::detect(value)
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            Self::Literal(pem) if pem.is_empty() => f.write_str("Literal(<empty>)"),
            Self::Literal(_) => f.write_str("Literal(<redacted>)"),
        }
    }
}

/// Configuration for the payment client and request signer.
#[derive(Clone, Deserialize)]
pub struct PayConfig {
    /// Merchant id (`mchid`).
    pub merchant_id: String,

    /// Application id the merchant is bound to (`appid`).
    pub app_id: String,

    /// Serial number of the merchant API certificate.
    #[serde(default)]
    pub serial_no: String,

    /// API v3 key, used as the AES-256-GCM key for encrypted fields.
    #[serde(default)]
    pub api_v3_key: String,

    /// Merchant private key used for request signing.
    #[serde(default)]
    pub private_key: KeySource,

    /// Platform public key or platform certificate for callback verification.
    #[serde(default)]
    pub public_key: KeySource,

    /// API base URL.
    #[serde(default = "default_pay_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_pay_base_url() -> String {
    DEFAULT_PAY_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    10
}

impl PayConfig {
    /// Create a payment configuration; keys and secrets are attached with
    /// the `with_*` methods and validated on first use.
    pub fn new(merchant_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            app_id: app_id.into(),
            serial_no: String::new(),
            api_v3_key: String::new(),
            private_key: KeySource::default(),
            public_key: KeySource::default(),
            base_url: default_pay_base_url(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set the merchant private key.
    pub fn with_private_key(mut self, source: impl Into<KeySource>) -> Self {
        self.private_key = source.into();
        self
    }

    /// Set the platform public key or certificate.
    pub fn with_public_key(mut self, source: impl Into<KeySource>) -> Self {
        self.public_key = source.into();
        self
    }

    /// Set the merchant certificate serial number.
    pub fn with_serial_no(mut self, serial_no: impl Into<String>) -> Self {
        self.serial_no = serial_no.into();
        self
    }

    /// Set the API v3 key.
    pub fn with_api_v3_key(mut self, key: impl Into<String>) -> Self {
        self.api_v3_key = key.into();
        self
    }

    /// Point the client at another API host (sandbox, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Transport settings derived from this configuration.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig::new(self.base_url.clone()).with_timeout(self.timeout_secs)
    }
}

impl fmt::Debug for PayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayConfig")
            .field("merchant_id", &self.merchant_id)
            .field("app_id", &self.app_id)
            .field("serial_no", &self.serial_no)
            .field("api_v3_key", &"<redacted>")
            .field("private_key", &self.private_key)
            .field("public_key", &self.public_key)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Configuration of the encrypted messaging callback.
#[derive(Clone, Deserialize)]
pub struct MessageConfig {
    /// Application id appended to every envelope.
    pub app_id: String,
    /// Token configured in the platform console.
    pub token: String,
    /// 43-character base64 `EncodingAESKey`.
    pub aes_key: String,
}

impl MessageConfig {
    /// Create a message codec configuration.
    pub fn new(
        app_id: impl Into<String>,
        token: impl Into<String>,
        aes_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            token: token.into(),
            aes_key: aes_key.into(),
        }
    }
}

impl fmt::Debug for MessageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageConfig")
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .field("aes_key", &"<redacted>")
            .finish()
    }
}

/// Settings for the HTTP transport.
#[derive(Clone, Debug, Deserialize)]
pub struct TransportConfig {
    /// Base URL every relative path is joined to.
    pub base_url: String,

    /// Request timeout ceiling in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    concat!("wxkit/", env!("CARGO_PKG_VERSION")).to_string()
}

impl TransportConfig {
    /// Create transport settings for a base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }

    /// Settings for the official-account API host.
    pub fn official_account() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Load the payment configuration from environment variables.
///
/// Required variables:
/// - `WXKIT_MCHID` - merchant id
/// - `WXKIT_APPID` - application id
///
/// Optional variables:
/// - `WXKIT_SERIAL_NO` - merchant certificate serial number
/// - `WXKIT_API_V3_KEY` - API v3 key
/// - `WXKIT_PRIVATE_KEY` - PEM text or absolute path of the merchant key
/// - `WXKIT_PUBLIC_KEY` - PEM text or absolute path of the platform key/certificate
/// - `WXKIT_PAY_BASE_URL` - API base URL
/// - `WXKIT_TIMEOUT` - request timeout in seconds (default: 10)
///
/// # Example
///
/// ```bash
/// export WXKIT_MCHID=1900000001
/// export WXKIT_APPID=wx8888888888888888
/// export WXKIT_PRIVATE_KEY=/etc/wxkit/apiclient_key.pem
/// ```
pub fn pay_config_from_env() -> Option<PayConfig> {
    let merchant_id = std::env::var("WXKIT_MCHID").ok()?;
    let app_id = std::env::var("WXKIT_APPID").ok()?;

    let mut config = PayConfig::new(merchant_id, app_id);

    if let Ok(serial_no) = std::env::var("WXKIT_SERIAL_NO") {
        config = config.with_serial_no(serial_no);
    }

    if let Ok(key) = std::env::var("WXKIT_API_V3_KEY") {
        config = config.with_api_v3_key(key);
    }

    if let Ok(private_key) = std::env::var("WXKIT_PRIVATE_KEY") {
        config = config.with_private_key(private_key);
    }

    if let Ok(public_key) = std::env::var("WXKIT_PUBLIC_KEY") {
        config = config.with_public_key(public_key);
    }

    if let Ok(base_url) = std::env::var("WXKIT_PAY_BASE_URL") {
        config = config.with_base_url(base_url);
    }

    if let Ok(timeout) = std::env::var("WXKIT_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config = config.with_timeout(secs);
        }
    }

    Some(config)
}

/// Load the message codec configuration from environment variables.
///
/// Requires `WXKIT_APPID`, `WXKIT_TOKEN` and `WXKIT_AES_KEY`.
pub fn message_config_from_env() -> Option<MessageConfig> {
    Some(MessageConfig::new(
        std::env::var("WXKIT_APPID").ok()?,
        std::env::var("WXKIT_TOKEN").ok()?,
        std::env::var("WXKIT_AES_KEY").ok()?,
    ))
}
