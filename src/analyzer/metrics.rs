//! Request records and per-endpoint running aggregates.

use crate::transport::HttpMethod;
use crate::utils::hour_of_day;
use serde::{Deserialize, Serialize};

/// One completed request, as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub endpoint: String,
    pub method: HttpMethod,
    pub timestamp_ms: u64,
    pub duration_ms: f64,
    pub success: bool,
    pub response_bytes: u64,
    pub cached: bool,
}

impl RequestRecord {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint_of(&endpoint.into()),
            method,
            timestamp_ms: crate::utils::now_ms(),
            duration_ms: 0.0,
            success: true,
            response_bytes: 0,
            cached: false,
        }
    }

    pub fn with_duration_ms(mut self, ms: f64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_response_bytes(mut self, bytes: u64) -> Self {
        self.response_bytes = bytes;
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn with_timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = ts;
        self
    }

    pub fn metrics_key(&self) -> String {
        metrics_key(self.method, &self.endpoint)
    }
}

/// Running aggregates for one `METHOD:endpoint` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub method: HttpMethod,
    pub total_requests: u64,
    pub average_response_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub data_transfer_bytes: u64,
    pub typical_payload_size: f64,
    pub last_access_ms: u64,
    /// Request counts per UTC hour of day.
    pub peak_usage_times: [u64; 24],
}

impl EndpointMetrics {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            total_requests: 0,
            average_response_time_ms: 0.0,
            success_rate: 0.0,
            error_rate: 0.0,
            cache_hit_rate: 0.0,
            data_transfer_bytes: 0,
            typical_payload_size: 0.0,
            last_access_ms: 0,
            peak_usage_times: [0; 24],
        }
    }

    /// Folds one record in with incremental-mean updates; O(1).
    pub fn apply(&mut self, record: &RequestRecord) {
        self.total_requests += 1;
        let n = self.total_requests as f64;

        self.average_response_time_ms += (record.duration_ms - self.average_response_time_ms) / n;

        let success = if record.success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + success) / n;
        self.error_rate = 1.0 - self.success_rate;

        let hit = if record.cached { 1.0 } else { 0.0 };
        self.cache_hit_rate = (self.cache_hit_rate * (n - 1.0) + hit) / n;

        self.data_transfer_bytes = self.data_transfer_bytes.saturating_add(record.response_bytes);
        self.typical_payload_size = self.data_transfer_bytes as f64 / n;

        self.last_access_ms = self.last_access_ms.max(record.timestamp_ms);
        self.peak_usage_times[hour_of_day(record.timestamp_ms)] += 1;
    }

    pub fn key(&self) -> String {
        metrics_key(self.method, &self.endpoint)
    }

    /// Hours (0..24) whose volume is the highest, busiest first; empty with no traffic.
    pub fn peak_hours(&self, n: usize) -> Vec<u8> {
        let mut hours: Vec<(u8, u64)> = self
            .peak_usage_times
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(h, c)| (h as u8, *c))
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        hours.into_iter().take(n).map(|(h, _)| h).collect()
    }
}

pub fn metrics_key(method: HttpMethod, endpoint: &str) -> String {
    format!("{}:{}", method, endpoint)
}

/// Normalizes a request URL to the endpoint path used in metrics keys:
/// scheme, host and query string are dropped.
pub fn endpoint_of(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if parsed.has_host() {
            return parsed.path().to_string();
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(duration: f64, success: bool, cached: bool, bytes: u64) -> RequestRecord {
        RequestRecord::new(HttpMethod::Get, "/api/search")
            .with_duration_ms(duration)
            .with_success(success)
            .with_cached(cached)
            .with_response_bytes(bytes)
            .with_timestamp_ms(3_600_000 * 14)
    }

    #[test]
    fn test_endpoint_normalization() {
        assert_eq!(endpoint_of("/api/content?id=3"), "/api/content");
        assert_eq!(endpoint_of("https://example.com/api/x?y=1"), "/api/x");
        assert_eq!(endpoint_of("/api/items#frag"), "/api/items");
        assert_eq!(endpoint_of(""), "/");
    }

    #[test]
    fn test_incremental_aggregates() {
        let mut m = EndpointMetrics::new(HttpMethod::Get, "/api/search");
        m.apply(&record(100.0, true, false, 1000));
        m.apply(&record(300.0, false, true, 3000));

        assert_eq!(m.total_requests, 2);
        assert!((m.average_response_time_ms - 200.0).abs() < 1e-9);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!((m.error_rate - 0.5).abs() < 1e-9);
        assert!((m.cache_hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(m.data_transfer_bytes, 4000);
        assert!((m.typical_payload_size - 2000.0).abs() < 1e-9);
        assert_eq!(m.peak_usage_times[14], 2);
        assert_eq!(m.key(), "GET:/api/search");
    }

    #[test]
    fn test_peak_hours_ordering() {
        let mut m = EndpointMetrics::new(HttpMethod::Get, "/a");
        m.peak_usage_times[9] = 5;
        m.peak_usage_times[17] = 12;
        m.peak_usage_times[3] = 5;
        assert_eq!(m.peak_hours(2), vec![17, 3]);
        assert!(EndpointMetrics::new(HttpMethod::Get, "/b").peak_hours(3).is_empty());
    }
}
