//! Recording in-memory transport.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{HttpMethod, HttpResponse, HttpTransport, MultipartForm};
use crate::{Result, WxkitError};

/// A request seen by [`MockTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub form: Option<MultipartForm>,
}

/// Transport that records every request and replays queued responses.
///
/// With an empty queue every request answers `200 {}`.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON response.
    pub fn respond_json(&self, status: u16, body: serde_json::Value) {
        self.push(Ok(HttpResponse::json_body(status, &body)));
    }

    /// Queue a response with a raw body.
    pub fn respond_bytes(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.push(Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: body.into(),
        }));
    }

    /// Queue a transport failure.
    pub fn fail_with(&self, error: WxkitError) {
        self.push(Err(error));
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn push(&self, response: Result<HttpResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn record(&self, request: RecordedRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::json_body(200, &serde_json::json!({}))))?;

        if !response.is_success() {
            return Err(WxkitError::Http {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        self.record(RecordedRequest {
            method: HttpMethod::Get,
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
            form: None,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        self.record(RecordedRequest {
            method: HttpMethod::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: Some(body.clone()),
            form: None,
        })
    }

    async fn post_multipart(&self, path: &str, form: MultipartForm) -> Result<HttpResponse> {
        self.record(RecordedRequest {
            method: HttpMethod::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: None,
            form: Some(form),
        })
    }
}
