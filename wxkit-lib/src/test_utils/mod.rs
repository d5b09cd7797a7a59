//! Test utilities for wxkit.
//!
//! Fixture RSA keys, a test merchant configuration and a recording
//! [`MockTransport`] for exercising the payment client without a network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wxkit_lib::pay::WxPayClient;
//! use wxkit_lib::test_utils::{test_pay_config, MockTransport};
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.respond_json(200, serde_json::json!({ "code_url": "weixin://wxpay/bizpayurl?pr=abc" }));
//!
//! let client = WxPayClient::with_transport(test_pay_config(), transport.clone());
//! ```

pub mod fixtures;
mod mock_transport;

pub use fixtures::{
    seal_field, test_message_config, test_pay_config, MERCHANT_PRIVATE_KEY_PEM,
    PLATFORM_CERTIFICATE_PEM, PLATFORM_PUBLIC_KEY_PEM, TEST_AES_KEY, TEST_API_V3_KEY,
    TEST_APP_ID, TEST_MERCHANT_ID, TEST_SERIAL_NO, TEST_TOKEN,
};
pub use mock_transport::{MockTransport, RecordedRequest};
