//! Usage-pattern classification.

use super::metrics::EndpointMetrics;
use serde::{Deserialize, Serialize};

/// Share of total volume above which an endpoint counts as high frequency (percent).
pub const HIGH_FREQUENCY_SHARE: f64 = 10.0;
pub const MEDIUM_FREQUENCY_SHARE: f64 = 2.0;

pub const BATCHABLE_MIN_REQUESTS: u64 = 50;
pub const BATCHABLE_MIN_SUCCESS: f64 = 0.95;
pub const CACHEABLE_MIN_SUCCESS: f64 = 0.90;
pub const CACHEABLE_MIN_RESPONSE_MS: f64 = 200.0;
pub const COMPRESSIBLE_MIN_PAYLOAD: f64 = 1024.0;
pub const CRITICAL_MIN_REQUESTS: u64 = 100;
pub const CRITICAL_MIN_SUCCESS: f64 = 0.98;
pub const CRITICAL_MAX_RESPONSE_MS: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    High,
    Medium,
    Low,
}

impl Frequency {
    pub fn from_share(share_percent: f64) -> Self {
        if share_percent > HIGH_FREQUENCY_SHARE {
            Frequency::High
        } else if share_percent > MEDIUM_FREQUENCY_SHARE {
            Frequency::Medium
        } else {
            Frequency::Low
        }
    }
}

/// Derived classification of one endpoint's traffic. Recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePattern {
    pub endpoint: String,
    pub frequency: Frequency,
    pub batchable: bool,
    pub cacheable: bool,
    pub compressible: bool,
    pub critical: bool,
    pub dependencies: Vec<String>,
    pub related_endpoints: Vec<String>,
}

/// Classifies `metrics` given the total request volume across all endpoints.
pub fn classify_metrics(metrics: &EndpointMetrics, total_volume: u64) -> UsagePattern {
    let share = if total_volume == 0 {
        0.0
    } else {
        metrics.total_requests as f64 / total_volume as f64 * 100.0
    };
    let read_only = metrics.method.is_read_only();

    UsagePattern {
        endpoint: metrics.key(),
        frequency: Frequency::from_share(share),
        batchable: read_only
            && metrics.total_requests > BATCHABLE_MIN_REQUESTS
            && metrics.success_rate > BATCHABLE_MIN_SUCCESS,
        cacheable: read_only
            && metrics.success_rate > CACHEABLE_MIN_SUCCESS
            && metrics.average_response_time_ms > CACHEABLE_MIN_RESPONSE_MS,
        compressible: metrics.typical_payload_size > COMPRESSIBLE_MIN_PAYLOAD,
        critical: metrics.total_requests > CRITICAL_MIN_REQUESTS
            && metrics.success_rate > CRITICAL_MIN_SUCCESS
            && metrics.average_response_time_ms < CRITICAL_MAX_RESPONSE_MS,
        dependencies: Vec::new(),
        related_endpoints: Vec::new(),
    }
}

/// First two path segments, e.g. `/api/users` for `/api/users/42/posts`.
fn resource_prefix(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).take(2).collect();
    format!("/{}", segments.join("/"))
}

fn path_of(key: &str) -> &str {
    key.split_once(':').map(|(_, p)| p).unwrap_or(key)
}

/// Known endpoints this one nests under (`/api/users` for `/api/users/42`).
///
/// Heuristic: plain path-prefix matching on segment boundaries.
pub fn find_dependencies<'a>(key: &str, known: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let path = path_of(key);
    let mut deps: Vec<String> = known
        .into_iter()
        .filter(|other| other.as_str() != key)
        .filter(|other| {
            let p = path_of(other);
            p != path && path.starts_with(p) && path[p.len()..].starts_with('/')
        })
        .cloned()
        .collect();
    deps.sort();
    deps.dedup();
    deps
}

/// Known endpoints sharing this one's resource prefix.
pub fn find_related_endpoints<'a>(
    key: &str,
    known: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    let prefix = resource_prefix(path_of(key));
    if prefix == "/" {
        return Vec::new();
    }
    let mut related: Vec<String> = known
        .into_iter()
        .filter(|other| other.as_str() != key)
        .filter(|other| resource_prefix(path_of(other)) == prefix)
        .cloned()
        .collect();
    related.sort();
    related.dedup();
    related
}
