use super::{HttpMethod, Transport, TransportError, TransportRequest, TransportResponse};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Prepended to relative request URLs (those starting with `/`).
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub default_headers: HashMap<String, String>,
    pub bearer_token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        // Minimal production-friendly defaults (env-overridable).
        Self {
            base_url: env::var("API_OPT_BASE_URL").ok(),
            timeout: Duration::from_secs(
                env::var("API_OPT_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(30),
            ),
            pool_max_idle_per_host: env::var("API_OPT_HTTP_POOL_MAX_IDLE_PER_HOST")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(32),
            pool_idle_timeout: Duration::from_secs(
                env::var("API_OPT_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            ),
            default_headers: HashMap::new(),
            bearer_token: env::var("API_OPT_BEARER_TOKEN").ok(),
        }
    }
}

impl HttpTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("http_transport"),
                )
            })?;
        Ok(Self { client, config })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(HttpTransportConfig::default().with_base_url(base_url))
    }

    fn resolve_url(&self, url: &str) -> String {
        match &self.config.base_url {
            Some(base) if url.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), url)
            }
            _ => url.to_string(),
        }
    }

    fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::timeout(timeout)
        } else if err.is_decode() || err.is_builder() {
            TransportError::Validation(err.to_string())
        } else if err.is_connect() || err.is_request() {
            TransportError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Flattens a JSON object into query pairs; non-object data yields nothing.
pub(crate) fn query_pairs(data: &Value) -> Vec<(String, String)> {
    match data {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let url = self.resolve_url(&request.url);
        let timeout = request.timeout.unwrap_or(self.config.timeout);

        let mut req = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };

        if let Some(data) = &request.data {
            req = match request.method {
                HttpMethod::Get => req.query(&query_pairs(data)),
                _ => req.json(data),
            };
        }

        if let Some(token) = &self.config.bearer_token {
            req = req.bearer_auth(token);
        }
        for (k, v) in self.config.default_headers.iter().chain(request.headers.iter()) {
            req = req.header(k, v);
        }
        req = req.timeout(timeout);

        debug!(method = %request.method, url = %url, "Dispatching HTTP request");
        let response = req.send().await.map_err(|e| Self::map_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(e, timeout))?;

        if status >= 400 {
            return Err(TransportError::Status {
                status,
                message: body,
            });
        }

        let data = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| TransportError::Validation(format!("invalid JSON response: {}", e)))?
        };
        Ok(TransportResponse { data, status })
    }
}
