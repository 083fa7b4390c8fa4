//! Transport collaborator: the abstract HTTP client the optimization layer sits on.
//!
//! # Transport Module
//!
//! The batch processor and the context never talk to sockets directly. They call
//! a [`Transport`], which is either the bundled [`HttpTransport`] (reqwest) or an
//! application-provided implementation (tests use scripted transports).
//!
//! Failures are reported with the typed [`TransportError`]. It is `Clone` so one
//! outcome can be handed to every caller attached to a deduplicated request.

mod http;

pub use http::{HttpTransport, HttpTransportConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Read-only methods are the only ones considered for caching and batching.
    pub fn is_read_only(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single call handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub data: Option<Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Header names lowercased and ordered, so header sets compare by content.
pub fn canonical_headers(headers: &HashMap<String, String>) -> BTreeMap<String, &str> {
    headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub data: Value,
    pub status: u16,
}

impl TransportResponse {
    pub fn ok(data: Value) -> Self {
        Self { data, status: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Structurally invalid request or response.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn timeout(d: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: d.as_millis() as u64,
        }
    }
}

/// Abstract HTTP client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;

    async fn get(
        &self,
        url: &str,
        data: Option<Value>,
        headers: Option<HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.execute(build(HttpMethod::Get, url, data, headers, timeout))
            .await
    }

    async fn post(
        &self,
        url: &str,
        data: Option<Value>,
        headers: Option<HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.execute(build(HttpMethod::Post, url, data, headers, timeout))
            .await
    }

    async fn put(
        &self,
        url: &str,
        data: Option<Value>,
        headers: Option<HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.execute(build(HttpMethod::Put, url, data, headers, timeout))
            .await
    }

    async fn delete(
        &self,
        url: &str,
        data: Option<Value>,
        headers: Option<HashMap<String, String>>,
        timeout: Option<Duration>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.execute(build(HttpMethod::Delete, url, data, headers, timeout))
            .await
    }
}

fn build(
    method: HttpMethod,
    url: &str,
    data: Option<Value>,
    headers: Option<HashMap<String, String>>,
    timeout: Option<Duration>,
) -> TransportRequest {
    TransportRequest {
        method,
        url: url.to_string(),
        data,
        headers: headers.unwrap_or_default(),
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_and_display() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("DELETE"), Some(HttpMethod::Delete));
        assert_eq!(HttpMethod::parse("PATCH"), None);
        assert_eq!(HttpMethod::Post.to_string(), "POST");
        assert!(HttpMethod::Get.is_read_only());
        assert!(!HttpMethod::Put.is_read_only());
    }

    #[test]
    fn test_method_serde_uppercase() {
        let json = serde_json::to_string(&HttpMethod::Put).unwrap();
        assert_eq!(json, "\"PUT\"");
        let back: HttpMethod = serde_json::from_str("\"GET\"").unwrap();
        assert_eq!(back, HttpMethod::Get);
    }

    #[test]
    fn test_canonical_headers_ignore_name_case() {
        let a: HashMap<String, String> =
            [("Authorization".to_string(), "alice".to_string())].into_iter().collect();
        let b: HashMap<String, String> =
            [("authorization".to_string(), "alice".to_string())].into_iter().collect();
        let c: HashMap<String, String> =
            [("authorization".to_string(), "bob".to_string())].into_iter().collect();
        assert_eq!(canonical_headers(&a), canonical_headers(&b));
        assert_ne!(canonical_headers(&a), canonical_headers(&c));
    }

    #[test]
    fn test_timeout_error_from_duration() {
        let err = TransportError::timeout(Duration::from_millis(250));
        assert_eq!(err, TransportError::Timeout { timeout_ms: 250 });
        assert_eq!(err.to_string(), "request timed out after 250ms");
    }
}
