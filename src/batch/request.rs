//! Requests waiting in a batch.

use crate::transport::{
    canonical_headers, HttpMethod, TransportError, TransportRequest, TransportResponse,
};
use crate::types::Priority;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub(crate) type Outcome = std::result::Result<TransportResponse, TransportError>;

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Bounds how long the caller waits; siblings are unaffected.
    pub timeout: Option<Duration>,
    pub headers: HashMap<String, String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// One logical request and every caller waiting on its outcome.
pub struct BatchableRequest {
    pub id: String,
    pub url: String,
    pub method: HttpMethod,
    pub data: Option<Value>,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub headers: HashMap<String, String>,
    pub timestamp_ms: u64,
    pub(crate) enqueued_at: Instant,
    pub(crate) waiters: Vec<oneshot::Sender<Outcome>>,
}

impl BatchableRequest {
    pub(crate) fn new(
        method: HttpMethod,
        url: impl Into<String>,
        data: Option<Value>,
        options: EnqueueOptions,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            method,
            data,
            priority: options.priority,
            timeout: options.timeout,
            headers: options.headers,
            timestamp_ms: crate::utils::now_ms(),
            enqueued_at: Instant::now(),
            waiters: Vec::new(),
        }
    }

    /// Same method, url, deep-equal data and the same headers (names compared
    /// case-insensitively).
    pub fn is_equivalent(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
        headers: &HashMap<String, String>,
    ) -> bool {
        self.method == method
            && self.url == url
            && self.data.as_ref() == data
            && canonical_headers(&self.headers) == canonical_headers(headers)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn attach(&mut self) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    pub(crate) fn to_transport(&self) -> TransportRequest {
        let mut req = TransportRequest::new(self.method, self.url.clone())
            .with_data(self.data.clone())
            .with_timeout(self.timeout);
        req.headers = self.headers.clone();
        req
    }

    /// Delivers one outcome to every attached caller. Callers that gave up are skipped.
    pub(crate) fn resolve(self, outcome: &Outcome) {
        for tx in self.waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}

impl std::fmt::Debug for BatchableRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchableRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
