//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use wxkit_lib::prelude::*;
//! ```
//!
//! ## What's Included
//!
//! - Configuration: `PayConfig`, `MessageConfig`, `TransportConfig`, `KeySource`
//! - Error types: `WxkitError`, `WxkitErrorCode`, `Result`
//! - Message codec: `MessageCodec`, `EncryptedReply`, `SymmetricKey`
//! - Payment: `WxPayClient`, `PaySigner`, `PrepaySignature`
//! - Transport traits: `HttpTransport`, `RequestInterceptor`

// Configuration
pub use crate::config::{KeySource, MessageConfig, PayConfig, TransportConfig};

// Error handling
pub use crate::errors::{WxkitError, WxkitErrorCode};
pub use crate::Result;

// Message codec
pub use crate::message::{
    jsapi_ticket_signature, object_to_xml, verify_signature, xml_to_object, EncryptedReply,
    JsapiSignature, MessageCodec, SymmetricKey,
};

// Payment
pub use crate::pay::{
    build_canonical_string, BillType, NotificationResource, PaySigner, PrepayInvocation,
    PrepaySignature, WxPayClient,
};

// Transport
pub use crate::transport::{HttpMethod, HttpResponse, HttpTransport, MultipartForm, RequestInterceptor};

#[cfg(feature = "http-client")]
pub use crate::transport::ReqwestTransport;
