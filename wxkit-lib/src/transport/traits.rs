use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{Result, WxkitError};

/// Default multipart field carrying the uploaded file.
pub const DEFAULT_MEDIA_FIELD: &str = "media";

/// File name used when none can be derived from the source.
pub const DEFAULT_FILE_NAME: &str = "file.bin";

/// HTTP verbs used by the platform APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request as seen by a [`RequestInterceptor`] just before dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    /// Path plus query string, exactly as sent.
    pub url: String,
    /// Serialized body, exactly as sent.
    pub body: Option<String>,
}

/// Raw response from the platform.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Build a response with a JSON body.
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as UTF-8 text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            WxkitError::Serialization(format!("failed to parse response body: {}", e))
        })
    }

    /// Body as a JSON value; an empty body is `null`.
    pub fn value(&self) -> Result<serde_json::Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        self.json()
    }
}

/// Where the bytes of an uploaded file come from.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A `multipart/form-data` upload: one file part plus text fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartForm {
    pub field_name: String,
    pub media: MediaSource,
    pub file_name: Option<String>,
    pub text_fields: Vec<(String, String)>,
}

impl MultipartForm {
    /// Upload the file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::from_source(MediaSource::Path(path.into()))
    }

    /// Upload in-memory bytes.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_source(MediaSource::Bytes(bytes.into()))
    }

    fn from_source(media: MediaSource) -> Self {
        Self {
            field_name: DEFAULT_MEDIA_FIELD.to_string(),
            media,
            file_name: None,
            text_fields: Vec::new(),
        }
    }

    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Add a text field.
    pub fn with_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.text_fields.push((name.into(), value.into()));
        self
    }

    /// Add the `description` field used by video uploads.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.with_text("description", description)
    }

    /// File name sent with the file part.
    ///
    /// An explicit name wins, then the basename of a path source, then
    /// [`DEFAULT_FILE_NAME`].
    pub fn resolved_file_name(&self) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match &self.media {
            MediaSource::Path(path) => basename(path).unwrap_or(DEFAULT_FILE_NAME).to_string(),
            MediaSource::Bytes(_) => DEFAULT_FILE_NAME.to_string(),
        }
    }
}

fn basename(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Capability-based HTTP client used by the payment and messaging APIs.
///
/// `path` is relative to the transport's base URL and may already carry a
/// query string.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `path` with `query` appended.
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse>;

    /// POST `body` as JSON.
    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<HttpResponse>;

    /// POST a `multipart/form-data` upload.
    async fn post_multipart(&self, path: &str, form: MultipartForm) -> Result<HttpResponse>;
}

/// Hook run on every outbound request, returning headers to attach.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, request: &OutboundRequest) -> Result<Vec<(String, String)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_resolution() {
        let form = MultipartForm::file("/tmp/uploads/cover.jpg");
        assert_eq!(form.field_name, "media");
        assert_eq!(form.resolved_file_name(), "cover.jpg");

        let form = MultipartForm::bytes(vec![1, 2, 3]);
        assert_eq!(form.resolved_file_name(), "file.bin");

        let form = MultipartForm::bytes(vec![1, 2, 3]).with_file_name("voice.mp3");
        assert_eq!(form.resolved_file_name(), "voice.mp3");
    }

    #[test]
    fn test_description_is_a_text_field() {
        let form = MultipartForm::file("/tmp/a.mp4")
            .with_field_name("media")
            .with_description(r#"{"title":"a"}"#);
        assert_eq!(
            form.text_fields,
            vec![("description".to_string(), r#"{"title":"a"}"#.to_string())]
        );
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: br#"{"prepay_id":"wx123"}"#.to_vec(),
        };
        assert!(response.is_success());
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.value().unwrap()["prepay_id"], "wx123");

        let empty = HttpResponse {
            status: 204,
            ..Default::default()
        };
        assert_eq!(empty.value().unwrap(), serde_json::Value::Null);
    }
}
