//! Batch configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// How requests are partitioned into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingStrategy {
    /// `METHOD:endpoint`
    Endpoint,
    Method,
    Priority,
    /// Method, coarse endpoint type, priority and body presence.
    #[default]
    Adaptive,
}

impl GroupingStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "endpoint" => Some(GroupingStrategy::Endpoint),
            "method" => Some(GroupingStrategy::Method),
            "priority" => Some(GroupingStrategy::Priority),
            "adaptive" => Some(GroupingStrategy::Adaptive),
            _ => None,
        }
    }
}

/// Per-endpoint flush thresholds; `None` falls back to the global value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointThreshold {
    pub max_batch_size: Option<usize>,
    pub max_wait_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_wait_time_ms: u64,
    pub grouping_strategy: GroupingStrategy,
    pub enable_deduplication: bool,
    /// Path prefixes whose GET requests may be merged into one call.
    pub combinable_endpoints: Vec<String>,
    /// Cost assumed for an unbatched request when estimating time savings.
    pub assumed_request_cost_ms: f64,
    /// Keyed by endpoint path (no query string).
    pub endpoint_overrides: HashMap<String, EndpointThreshold>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_wait_time_ms: 50,
            grouping_strategy: GroupingStrategy::Adaptive,
            enable_deduplication: true,
            combinable_endpoints: Vec::new(),
            assumed_request_cost_ms: 100.0,
            endpoint_overrides: HashMap::new(),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time_ms = wait.as_millis() as u64;
        self
    }
    pub fn with_grouping_strategy(mut self, strategy: GroupingStrategy) -> Self {
        self.grouping_strategy = strategy;
        self
    }
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.enable_deduplication = enabled;
        self
    }
    pub fn with_combinable_endpoint(mut self, prefix: impl Into<String>) -> Self {
        self.combinable_endpoints.push(prefix.into());
        self
    }
    pub fn with_endpoint_override(mut self, endpoint: impl Into<String>, threshold: EndpointThreshold) -> Self {
        self.endpoint_overrides.insert(endpoint.into(), threshold);
        self
    }

    /// Effective `(max_batch_size, max_wait)` for an endpoint path.
    pub fn thresholds_for(&self, endpoint: &str) -> (usize, Duration) {
        let o = self.endpoint_overrides.get(endpoint).copied().unwrap_or_default();
        let size = o.max_batch_size.unwrap_or(self.max_batch_size).max(1);
        let wait = o.max_wait_time_ms.unwrap_or(self.max_wait_time_ms);
        (size, Duration::from_millis(wait))
    }

    /// Applies `API_OPT_MAX_BATCH_SIZE`, `API_OPT_MAX_WAIT_MS` and `API_OPT_GROUPING`.
    pub fn apply_env(&mut self) {
        if let Some(v) = env::var("API_OPT_MAX_BATCH_SIZE").ok().and_then(|s| s.parse().ok()) {
            self.max_batch_size = v;
        }
        if let Some(v) = env::var("API_OPT_MAX_WAIT_MS").ok().and_then(|s| s.parse().ok()) {
            self.max_wait_time_ms = v;
        }
        if let Some(v) = env::var("API_OPT_GROUPING").ok().and_then(|s| GroupingStrategy::parse(&s)) {
            self.grouping_strategy = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::configuration_with_context(
                "max_batch_size must be greater than zero",
                ErrorContext::new().with_field_path("batch.max_batch_size"),
            ));
        }
        for (endpoint, o) in &self.endpoint_overrides {
            if o.max_batch_size == Some(0) {
                return Err(Error::configuration_with_context(
                    "override max_batch_size must be greater than zero",
                    ErrorContext::new()
                        .with_field_path(format!("batch.endpoint_overrides.{}", endpoint)),
                ));
            }
        }
        if !self.assumed_request_cost_ms.is_finite() || self.assumed_request_cost_ms < 0.0 {
            return Err(Error::configuration_with_context(
                "assumed_request_cost_ms must be a non-negative number",
                ErrorContext::new().with_field_path("batch.assumed_request_cost_ms"),
            ));
        }
        Ok(())
    }

    pub fn apply(&mut self, update: &BatchConfigUpdate) {
        if let Some(v) = update.max_batch_size {
            self.max_batch_size = v;
        }
        if let Some(v) = update.max_wait_time_ms {
            self.max_wait_time_ms = v;
        }
        if let Some(v) = update.grouping_strategy {
            self.grouping_strategy = v;
        }
        if let Some(v) = update.enable_deduplication {
            self.enable_deduplication = v;
        }
        if let Some(ref v) = update.combinable_endpoints {
            self.combinable_endpoints = v.clone();
        }
        if let Some(v) = update.assumed_request_cost_ms {
            self.assumed_request_cost_ms = v;
        }
        if let Some(ref v) = update.endpoint_overrides {
            for (k, t) in v {
                self.endpoint_overrides.insert(k.clone(), *t);
            }
        }
    }
}

/// Partial update for [`BatchConfig`]. Overrides are merged, not replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfigUpdate {
    pub max_batch_size: Option<usize>,
    pub max_wait_time_ms: Option<u64>,
    pub grouping_strategy: Option<GroupingStrategy>,
    pub enable_deduplication: Option<bool>,
    pub combinable_endpoints: Option<Vec<String>>,
    pub assumed_request_cost_ms: Option<f64>,
    pub endpoint_overrides: Option<HashMap<String, EndpointThreshold>>,
}
