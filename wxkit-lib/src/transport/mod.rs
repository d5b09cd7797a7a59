//! HTTP transport abstraction.
//!
//! [`HttpTransport`] is the seam the payment client talks through; the
//! reqwest implementation lives behind the `http-client` feature.

#[cfg(feature = "http-client")]
mod http;
mod traits;

#[cfg(feature = "http-client")]
pub use http::{
    file_name_from_url, path_with_query, DownloadedFile, MediaUploadOptions, ReqwestTransport,
};
pub use traits::{
    HttpMethod, HttpResponse, HttpTransport, MediaSource, MultipartForm, OutboundRequest,
    RequestInterceptor, DEFAULT_FILE_NAME, DEFAULT_MEDIA_FIELD,
};
