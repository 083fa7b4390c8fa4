//! Preload candidate selection.

use crate::analyzer::EndpointMetrics;
use crate::transport::HttpMethod;
use serde::{Deserialize, Serialize};

/// Minimum success rate for an endpoint to be worth warming.
pub const PRELOAD_MIN_SUCCESS_RATE: f64 = 0.95;
/// Peak hours tracked per candidate.
pub const PRELOAD_PEAK_HOURS: usize = 3;

/// An endpoint registered for advisory warming around its busiest hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadCandidate {
    /// `METHOD:endpoint` metrics key.
    pub key: String,
    pub method: HttpMethod,
    pub endpoint: String,
    /// Busiest UTC hours, busiest first.
    pub peak_hours: Vec<u8>,
    pub total_requests: u64,
    pub success_rate: f64,
}

impl PreloadCandidate {
    pub fn from_metrics(m: &EndpointMetrics) -> Self {
        Self {
            key: m.key(),
            method: m.method,
            endpoint: m.endpoint.clone(),
            peak_hours: m.peak_hours(PRELOAD_PEAK_HOURS),
            total_requests: m.total_requests,
            success_rate: m.success_rate,
        }
    }

    /// Due when `hour` is a peak hour or the hour right before one.
    pub fn is_due(&self, hour: usize) -> bool {
        let hour = (hour % 24) as u8;
        let next = (hour + 1) % 24;
        self.peak_hours.iter().any(|h| *h == hour || *h == next)
    }
}

/// Only read-only endpoints with observed peak hours can be warmed.
pub fn select_candidates(top: &[EndpointMetrics]) -> Vec<PreloadCandidate> {
    top.iter()
        .filter(|m| m.method.is_read_only())
        .map(PreloadCandidate::from_metrics)
        .filter(|c| !c.peak_hours.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(method: HttpMethod, path: &str, hours: &[(usize, u64)]) -> EndpointMetrics {
        let mut m = EndpointMetrics::new(method, path);
        for (h, c) in hours {
            m.peak_usage_times[*h] = *c;
            m.total_requests += c;
        }
        m.success_rate = 1.0;
        m
    }

    #[test]
    fn test_due_includes_hour_before_peak() {
        let c = PreloadCandidate::from_metrics(&metrics(HttpMethod::Get, "/feed", &[(9, 40), (0, 5)]));
        assert_eq!(c.peak_hours, vec![9, 0]);
        assert!(c.is_due(9));
        assert!(c.is_due(8));
        assert!(c.is_due(23));
        assert!(!c.is_due(10));
    }

    #[test]
    fn test_mutations_are_never_candidates() {
        let top = vec![
            metrics(HttpMethod::Post, "/orders", &[(3, 10)]),
            metrics(HttpMethod::Get, "/catalog", &[(3, 10)]),
            metrics(HttpMethod::Get, "/idle", &[]),
        ];
        let picked = select_candidates(&top);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].key, "GET:/catalog");
    }
}
