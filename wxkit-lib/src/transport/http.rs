//! reqwest-backed [`HttpTransport`].
//!
//! Requests are sent relative to a base URL with a fixed timeout ceiling.
//! JSON bodies are serialized once; the same string is handed to the
//! interceptor for signing and sent on the wire.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::traits::{
    HttpMethod, HttpResponse, HttpTransport, MediaSource, MultipartForm, OutboundRequest,
    RequestInterceptor, DEFAULT_MEDIA_FIELD,
};
use crate::config::TransportConfig;
use crate::{Result, WxkitError};

/// Name used for downloads whose URL has no usable file name.
const DEFAULT_DOWNLOAD_NAME: &str = "download.bin";

/// Options for [`ReqwestTransport::post_multipart_from_url`].
#[derive(Clone, Debug, Default)]
pub struct MediaUploadOptions {
    /// Multipart field name, `media` when unset.
    pub field_name: Option<String>,
    /// Overrides the name taken from the URL.
    pub file_name: Option<String>,
    pub description: Option<String>,
}

/// A file fetched by [`ReqwestTransport::download_file`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub url: String,
}

impl DownloadedFile {
    /// Remove the file; a file that is already gone is not an error.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// HTTP transport over a shared reqwest client.
pub struct ReqwestTransport {
    config: TransportConfig,
    client: reqwest::Client,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
}

impl ReqwestTransport {
    /// Create a transport for `config.base_url`.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| WxkitError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            interceptor: None,
        })
    }

    /// Transport for the official-account API.
    pub fn official_account() -> Result<Self> {
        Self::new(TransportConfig::official_account())
    }

    /// Run `interceptor` on every request before it is sent.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn url(&self, path_and_query: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        )
    }

    async fn execute(
        &self,
        method: HttpMethod,
        path_and_query: String,
        body: Option<String>,
        builder: reqwest::RequestBuilder,
    ) -> Result<HttpResponse> {
        let mut builder = builder;

        if let Some(interceptor) = &self.interceptor {
            let request = OutboundRequest {
                method,
                url: path_and_query,
                body,
            };
            for (name, value) in interceptor.intercept(&request).await? {
                builder = builder.header(name, value);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let response = collect(response).await?;
        if !response.is_success() {
            return Err(WxkitError::Http {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> WxkitError {
        map_reqwest_error(e, &self.config)
    }

    /// Fetch a remote file and upload it as `path`'s multipart media part.
    ///
    /// The file name defaults to the last segment of `file_url`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, options), fields(path = %path)))]
    pub async fn post_multipart_from_url(
        &self,
        path: &str,
        file_url: &str,
        options: MediaUploadOptions,
    ) -> Result<HttpResponse> {
        let response = self
            .client
            .get(file_url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let fetched = collect(response).await?;
        if fetched.status != 200 {
            return Err(WxkitError::Http {
                status: fetched.status,
                body: format!("failed to fetch {}", file_url),
            });
        }

        let file_name = options
            .file_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| file_name_from_url(file_url));

        let mut form = MultipartForm::bytes(fetched.body)
            .with_field_name(
                options
                    .field_name
                    .unwrap_or_else(|| DEFAULT_MEDIA_FIELD.to_string()),
            )
            .with_file_name(file_name);
        if let Some(description) = options.description.filter(|d| !d.is_empty()) {
            form = form.with_description(description);
        }

        self.post_multipart(path, form).await
    }

    /// Stream `url` into a file under `dir`, named after the URL's last
    /// path segment.
    ///
    /// The partially written file is removed when the download fails.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, dir)))]
    pub async fn download_file(&self, url: &str, dir: &Path) -> Result<DownloadedFile> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WxkitError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let path = dir.join(file_name_from_url(url));
        if let Err(e) = write_body(&path, response, &self.config).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path.display(), "download complete");

        Ok(DownloadedFile {
            path,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, query), fields(path = %path)))]
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        let path_and_query = path_with_query(path, query);
        let builder = self.client.get(self.url(&path_and_query));

        #[cfg(feature = "tracing")]
        tracing::debug!(method = "GET", "dispatching request");

        self.execute(HttpMethod::Get, path_and_query, None, builder)
            .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, body), fields(path = %path)))]
    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let serialized = serde_json::to_string(body)?;
        let builder = self
            .client
            .post(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serialized.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(method = "POST", body_len = serialized.len(), "dispatching request");

        self.execute(HttpMethod::Post, path.to_string(), Some(serialized), builder)
            .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, form), fields(path = %path)))]
    async fn post_multipart(&self, path: &str, form: MultipartForm) -> Result<HttpResponse> {
        let file_name = form.resolved_file_name();
        let bytes = match form.media {
            MediaSource::Path(source) => tokio::fs::read(&source).await?,
            MediaSource::Bytes(bytes) => bytes,
        };

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut multipart = reqwest::multipart::Form::new().part(form.field_name, part);
        for (name, value) in form.text_fields {
            multipart = multipart.text(name, value);
        }

        let builder = self.client.post(self.url(path)).multipart(multipart);

        #[cfg(feature = "tracing")]
        tracing::debug!(method = "POST", "dispatching multipart upload");

        self.execute(HttpMethod::Post, path.to_string(), None, builder)
            .await
    }
}

async fn collect(response: reqwest::Response) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response
        .bytes()
        .await
        .map_err(|e| WxkitError::Transport(format!("failed to read response: {}", e)))?
        .to_vec();

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

async fn write_body(
    path: &Path,
    mut response: reqwest::Response,
    config: &TransportConfig,
) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| map_reqwest_error(e, config))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

fn map_reqwest_error(e: reqwest::Error, config: &TransportConfig) -> WxkitError {
    if e.is_timeout() {
        WxkitError::ConnectionTimeout {
            operation: "HTTP request".to_string(),
            timeout_ms: config.timeout_secs * 1000,
        }
    } else if e.is_connect() {
        WxkitError::ConnectionFailed {
            target: config.base_url.clone(),
            reason: e.to_string(),
        }
    } else {
        WxkitError::Transport(format!("request failed: {}", e))
    }
}

/// Append `query` to `path`, form-encoded.
pub fn path_with_query(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query)
        .finish();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, encoded)
}

/// Last non-empty path segment of `url`.
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_with_query() {
        assert_eq!(path_with_query("/v3/certificates", &[]), "/v3/certificates");
        assert_eq!(
            path_with_query("/v3/pay/transactions/id/42", &[("mchid", "1900000001")]),
            "/v3/pay/transactions/id/42?mchid=1900000001"
        );
        assert_eq!(
            path_with_query("/v3/billdownload/file?token=abc", &[("a", "b c")]),
            "/v3/billdownload/file?token=abc&a=b+c"
        );
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://cdn.example.com/media/photo.png?x=1"),
            "photo.png"
        );
        assert_eq!(file_name_from_url("https://cdn.example.com/"), "download.bin");
        assert_eq!(file_name_from_url("not a url"), "download.bin");
    }

    #[test]
    fn test_url_joining() {
        let transport =
            ReqwestTransport::new(TransportConfig::new("https://api.mch.weixin.qq.com/")).unwrap();
        assert_eq!(
            transport.url("/v3/certificates"),
            "https://api.mch.weixin.qq.com/v3/certificates"
        );
    }

    #[test]
    fn test_official_account_transport() {
        let transport = ReqwestTransport::official_account().unwrap();
        assert_eq!(transport.config().base_url, "https://api.weixin.qq.com");
        assert_eq!(transport.config().timeout_secs, 10);
        assert_eq!(
            transport.url(&path_with_query("/cgi-bin/ticket/getticket", &[("type", "jsapi")])),
            "https://api.weixin.qq.com/cgi-bin/ticket/getticket?type=jsapi"
        );
    }
}
