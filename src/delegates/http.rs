use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::async_op::OperationContext;
use crate::delegates::DelegateResponse;
use crate::error::{MipError, NetworkCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpRequestType {
    Get,
    Post,
}

/// Header map with case-insensitive names that remembers the original spelling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: BTreeMap<String, (String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub id: String,
    pub request_type: HttpRequestType,
    pub url: String,
    pub body: Vec<u8>,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_type: HttpRequestType::Get,
            url: url.into(),
            body: Vec::new(),
            headers: HttpHeaders::new(),
        }
    }

    /// Url without query string or fragment, safe for logs and errors
    pub fn sanitized_url(&self) -> &str {
        let end = self
            .url
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.url.len());
        &self.url[..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub id: String,
    pub status_code: i32,
    pub body: Vec<u8>,
    pub headers: HttpHeaders,
}

/// Outcome of a request; no response means the request was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOperation {
    pub id: String,
    pub response: Option<HttpResponse>,
    pub cancelled: bool,
}

pub type HttpCallback = Box<dyn FnOnce(DelegateResponse<HttpOperation>) + Send + 'static>;

/// Transport used for every service call
pub trait HttpDelegate: Send + Sync {
    fn send(
        &self,
        request: &HttpRequest,
        context: Option<&OperationContext>,
    ) -> DelegateResponse<HttpOperation>;

    /// Start a request and report through `callback`; the returned operation
    /// carries the request id for cancellation
    fn send_async(
        &self,
        request: HttpRequest,
        context: Option<OperationContext>,
        callback: HttpCallback,
    ) -> HttpOperation {
        let id = request.id.clone();
        callback(self.send(&request, context.as_ref()));
        HttpOperation {
            id,
            response: None,
            cancelled: false,
        }
    }

    fn cancel_operation(&self, request_id: &str);

    fn cancel_all_operations(&self);
}

/// Default transport for hosts that never go online
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineHttpDelegate;

impl HttpDelegate for OfflineHttpDelegate {
    fn send(
        &self,
        request: &HttpRequest,
        _context: Option<&OperationContext>,
    ) -> DelegateResponse<HttpOperation> {
        Err(MipError::network(
            NetworkCategory::Offline,
            "No HTTP transport is configured",
            request.sanitized_url(),
            &request.id,
            0,
        ))
    }

    fn cancel_operation(&self, _request_id: &str) {}

    fn cancel_all_operations(&self) {}
}
