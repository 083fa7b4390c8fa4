//! Shared fixtures for integration tests.
#![allow(dead_code)]

use api_traffic_optimizer::transport::{Transport, TransportRequest};
use api_traffic_optimizer::{TransportError, TransportResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Handler =
    Arc<dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// Scripted transport that records every call it receives.
pub struct MockTransport {
    calls: Mutex<Vec<TransportRequest>>,
    handler: Handler,
    latency: Duration,
}

impl MockTransport {
    /// Answers every call with `{"method", "url", "data"}` of the request.
    pub fn echo() -> Self {
        Self::with_handler(|req| {
            Ok(TransportResponse::ok(json!({
                "method": req.method.as_str(),
                "url": req.url,
                "data": req.data.clone().unwrap_or(Value::Null),
            })))
        })
    }

    pub fn with_handler(
        handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Arc::new(handler),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.handler)(&request)
    }
}
