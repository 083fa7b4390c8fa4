//! Process-wide optimizer configuration.
//!
//! Loaded from YAML (every field optional), then overridden by `API_OPT_*`
//! environment variables, then validated.
//!
//! ```yaml
//! batch:
//!   max_batch_size: 20
//!   max_wait_time_ms: 25
//!   grouping_strategy: endpoint
//!   combinable_endpoints: ["/api/content"]
//! cache:
//!   eviction_strategy: lru
//!   max_size_bytes: 1048576
//! maintenance_interval_ms: 60000
//! ```

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    /// Cache sweep, snapshot and preload cadence.
    pub maintenance_interval_ms: u64,
    /// How often analyzer suggestions are applied back to cache and batcher; 0 disables.
    pub tuning_interval_ms: u64,
    /// How often a report is pushed to the report sink; 0 disables.
    pub report_interval_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            cache: CacheConfig::default(),
            maintenance_interval_ms: 60_000,
            tuning_interval_ms: 5 * 60_000,
            report_interval_ms: 0,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval_ms = interval.as_millis() as u64;
        self
    }
    pub fn with_tuning_interval(mut self, interval: Duration) -> Self {
        self.tuning_interval_ms = interval.as_millis() as u64;
        self
    }
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid optimizer config: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })
    }

    /// Reads YAML from `path`, applies env overrides and validates.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config: {}", e),
                ErrorContext::new().with_details(path.display().to_string()),
            )
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.batch.apply_env();
        self.cache.apply_env();
    }

    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        self.cache.validate()?;
        if self.maintenance_interval_ms == 0 {
            return Err(Error::configuration_with_context(
                "maintenance_interval_ms must be greater than zero",
                ErrorContext::new().with_field_path("maintenance_interval_ms"),
            ));
        }
        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn tuning_interval(&self) -> Option<Duration> {
        (self.tuning_interval_ms > 0).then(|| Duration::from_millis(self.tuning_interval_ms))
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_ms > 0).then(|| Duration::from_millis(self.report_interval_ms))
    }
}
