//! Cache configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    Lru,
    Lfu,
    Ttl,
    #[default]
    Adaptive,
}

impl EvictionStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionStrategy::Lru),
            "lfu" => Some(EvictionStrategy::Lfu),
            "ttl" => Some(EvictionStrategy::Ttl),
            "adaptive" => Some(EvictionStrategy::Adaptive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub max_size_bytes: usize,
    pub eviction_strategy: EvictionStrategy,
    pub compression_enabled: bool,
    /// Serialized values larger than this are compressed when compression is on.
    pub compression_threshold_bytes: usize,
    pub stale_while_revalidate: bool,
    /// Upper bound on entries examined by one maintenance sweep.
    pub maintenance_sweep_limit: usize,
    /// How many high-volume endpoints are considered for preloading.
    pub preload_top_n: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5 * 60 * 1000,
            max_size_bytes: 10 * 1024 * 1024,
            eviction_strategy: EvictionStrategy::Adaptive,
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            stale_while_revalidate: true,
            maintenance_sweep_limit: 1000,
            preload_top_n: 10,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }
    pub fn with_max_size_bytes(mut self, bytes: usize) -> Self {
        self.max_size_bytes = bytes;
        self
    }
    pub fn with_eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = strategy;
        self
    }
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }
    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = bytes;
        self
    }
    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Applies `API_OPT_CACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(v) = env::var("API_OPT_CACHE_TTL_MS").ok().and_then(|s| s.parse().ok()) {
            self.ttl_ms = v;
        }
        if let Some(v) = env::var("API_OPT_CACHE_MAX_BYTES").ok().and_then(|s| s.parse().ok()) {
            self.max_size_bytes = v;
        }
        if let Some(v) = env::var("API_OPT_EVICTION").ok().and_then(|s| EvictionStrategy::parse(&s)) {
            self.eviction_strategy = v;
        }
        if let Some(v) = env::var("API_OPT_COMPRESSION").ok().and_then(|s| s.parse().ok()) {
            self.compression_enabled = v;
        }
        if let Some(v) = env::var("API_OPT_STALE_WHILE_REVALIDATE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.stale_while_revalidate = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(Error::configuration_with_context(
                "max_size_bytes must be greater than zero",
                ErrorContext::new().with_field_path("cache.max_size_bytes"),
            ));
        }
        if self.ttl_ms == 0 {
            return Err(Error::configuration_with_context(
                "ttl_ms must be greater than zero",
                ErrorContext::new().with_field_path("cache.ttl_ms"),
            ));
        }
        Ok(())
    }

    pub fn apply(&mut self, update: &CacheConfigUpdate) {
        if let Some(v) = update.ttl_ms {
            self.ttl_ms = v;
        }
        if let Some(v) = update.max_size_bytes {
            self.max_size_bytes = v;
        }
        if let Some(v) = update.eviction_strategy {
            self.eviction_strategy = v;
        }
        if let Some(v) = update.compression_enabled {
            self.compression_enabled = v;
        }
        if let Some(v) = update.compression_threshold_bytes {
            self.compression_threshold_bytes = v;
        }
        if let Some(v) = update.stale_while_revalidate {
            self.stale_while_revalidate = v;
        }
        if let Some(v) = update.maintenance_sweep_limit {
            self.maintenance_sweep_limit = v;
        }
        if let Some(v) = update.preload_top_n {
            self.preload_top_n = v;
        }
    }
}

/// Partial update for [`CacheConfig`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigUpdate {
    pub ttl_ms: Option<u64>,
    pub max_size_bytes: Option<usize>,
    pub eviction_strategy: Option<EvictionStrategy>,
    pub compression_enabled: Option<bool>,
    pub compression_threshold_bytes: Option<usize>,
    pub stale_while_revalidate: Option<bool>,
    pub maintenance_sweep_limit: Option<usize>,
    pub preload_top_n: Option<usize>,
}
