//! Usage-pattern analysis over completed requests.
//!
//! # Performance Analyzer
//!
//! The analyzer ingests one [`RequestRecord`] per completed request, keeps
//! running per-endpoint [`EndpointMetrics`], and turns them into
//! [`UsagePattern`]s, ranked [`OptimizationSuggestion`]s and a
//! [`PerformanceReport`]. The cache and the batch processor read its metrics
//! as snapshots; nothing outside the analyzer mutates them.
//!
//! The analyzer never fails: missing data shows up as zero-valued metrics.
//!
//! ```rust
//! use api_traffic_optimizer::analyzer::{PerformanceAnalyzer, RequestRecord};
//! use api_traffic_optimizer::transport::HttpMethod;
//!
//! let analyzer = PerformanceAnalyzer::new();
//! analyzer.record(
//!     RequestRecord::new(HttpMethod::Get, "/api/search?q=rust").with_duration_ms(250.0),
//! );
//! let pattern = analyzer.classify("GET:/api/search");
//! assert!(pattern.cacheable);
//! assert!(!pattern.batchable); // needs more than 50 requests
//! ```

mod metrics;
mod pattern;
mod suggestion;

pub use metrics::{endpoint_of, metrics_key, EndpointMetrics, RequestRecord};
pub use pattern::{
    classify_metrics, find_dependencies, find_related_endpoints, Frequency, UsagePattern,
};
pub use suggestion::{
    build_report, sort_suggestions, suggestions_for, Effort, EndpointSummary, EstimatedImpact,
    OptimizationSuggestion, PerformanceReport, SuggestionKind,
};

use crate::utils::{lock, now_ms};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

/// Records kept in the history ring buffer before the oldest are dropped.
pub const HISTORY_CAPACITY: usize = 10_000;
/// Records included in the metrics export.
pub const EXPORT_RECENT_REQUESTS: usize = 100;

#[derive(Default)]
struct AnalyzerState {
    history: VecDeque<RequestRecord>,
    metrics: HashMap<String, EndpointMetrics>,
    last_report: Option<PerformanceReport>,
}

impl AnalyzerState {
    fn total_volume(&self) -> u64 {
        self.metrics.values().map(|m| m.total_requests).sum()
    }

    fn classify(&self, key: &str) -> UsagePattern {
        let mut pattern = match self.metrics.get(key) {
            Some(m) => classify_metrics(m, self.total_volume()),
            None => {
                let (method, path) = key.split_once(':').unwrap_or(("GET", key));
                let method = crate::transport::HttpMethod::parse(method)
                    .unwrap_or(crate::transport::HttpMethod::Get);
                classify_metrics(&EndpointMetrics::new(method, path), self.total_volume())
            }
        };
        pattern.dependencies = find_dependencies(key, self.metrics.keys());
        pattern.related_endpoints = find_related_endpoints(key, self.metrics.keys());
        pattern
    }

    fn suggest(&self) -> Vec<OptimizationSuggestion> {
        let mut out = Vec::new();
        for (key, m) in &self.metrics {
            let pattern = self.classify(key);
            out.extend(suggestions_for(m, &pattern));
        }
        sort_suggestions(&mut out);
        out
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsExport<'a> {
    exported_at_ms: u64,
    metrics: &'a HashMap<String, EndpointMetrics>,
    recent_requests: Vec<&'a RequestRecord>,
    report: &'a PerformanceReport,
}

/// Aggregates request records into per-endpoint metrics and suggestions.
pub struct PerformanceAnalyzer {
    state: Mutex<AnalyzerState>,
    history_capacity: usize,
}

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self::with_history_capacity(HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(AnalyzerState::default()),
            history_capacity: capacity.max(1),
        }
    }

    /// Appends to history and folds the record into its endpoint's metrics. O(1) amortized.
    pub fn record(&self, record: RequestRecord) {
        let mut st = lock(&self.state);
        let key = record.metrics_key();
        st.metrics
            .entry(key)
            .or_insert_with(|| EndpointMetrics::new(record.method, record.endpoint.clone()))
            .apply(&record);
        st.history.push_back(record);
        while st.history.len() > self.history_capacity {
            st.history.pop_front();
        }
    }

    /// Classifies a `METHOD:endpoint` key. Unknown keys classify as idle traffic.
    pub fn classify(&self, key: &str) -> UsagePattern {
        lock(&self.state).classify(key)
    }

    pub fn find_dependencies(&self, key: &str) -> Vec<String> {
        find_dependencies(key, lock(&self.state).metrics.keys())
    }

    pub fn find_related_endpoints(&self, key: &str) -> Vec<String> {
        find_related_endpoints(key, lock(&self.state).metrics.keys())
    }

    /// Suggestions for every known endpoint, highest priority first.
    pub fn suggest(&self) -> Vec<OptimizationSuggestion> {
        lock(&self.state).suggest()
    }

    /// Builds a fresh report and keeps it as the latest one.
    pub fn report(&self) -> PerformanceReport {
        let mut st = lock(&self.state);
        let suggestions = st.suggest();
        let metrics: Vec<&EndpointMetrics> = st.metrics.values().collect();
        let report = build_report(&metrics, suggestions, now_ms());
        st.last_report = Some(report.clone());
        debug!(
            total_requests = report.total_requests,
            endpoints = report.total_endpoints,
            suggestions = report.suggestions.len(),
            "Built performance report"
        );
        report
    }

    pub fn last_report(&self) -> Option<PerformanceReport> {
        lock(&self.state).last_report.clone()
    }

    /// JSON with metrics, the recent request log tail and the latest report.
    pub fn export_metrics(&self) -> String {
        let report = match self.last_report() {
            Some(r) => r,
            None => self.report(),
        };
        let st = lock(&self.state);
        let skip = st.history.len().saturating_sub(EXPORT_RECENT_REQUESTS);
        let export = MetricsExport {
            exported_at_ms: now_ms(),
            metrics: &st.metrics,
            recent_requests: st.history.iter().skip(skip).collect(),
            report: &report,
        };
        serde_json::to_string_pretty(&export).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn metrics(&self, key: &str) -> Option<EndpointMetrics> {
        lock(&self.state).metrics.get(key).cloned()
    }

    /// Read-only copy of every endpoint's metrics.
    pub fn metrics_snapshot(&self) -> HashMap<String, EndpointMetrics> {
        lock(&self.state).metrics.clone()
    }

    pub fn endpoint_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.state).metrics.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Highest-volume endpoints with a success rate above `min_success_rate`.
    pub fn top_endpoints(&self, n: usize, min_success_rate: f64) -> Vec<EndpointMetrics> {
        let st = lock(&self.state);
        let mut top: Vec<EndpointMetrics> = st
            .metrics
            .values()
            .filter(|m| m.total_requests > 0 && m.success_rate > min_success_rate)
            .cloned()
            .collect();
        top.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then(a.key().cmp(&b.key()))
        });
        top.truncate(n);
        top
    }

    pub fn history_len(&self) -> usize {
        lock(&self.state).history.len()
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<RequestRecord> {
        let st = lock(&self.state);
        let skip = st.history.len().saturating_sub(n);
        st.history.iter().skip(skip).cloned().collect()
    }

    /// Drops history older than `older_than_ms`, removing at most `limit` records.
    /// Metrics are untouched.
    pub fn prune_history(&self, older_than_ms: u64, limit: usize) -> usize {
        let mut st = lock(&self.state);
        let mut removed = 0;
        while removed < limit {
            match st.history.front() {
                Some(r) if r.timestamp_ms < older_than_ms => {
                    st.history.pop_front();
                    removed += 1;
                }
                _ => break,
            }
        }
        removed
    }

    pub fn clear(&self) {
        let mut st = lock(&self.state);
        st.history.clear();
        st.metrics.clear();
        st.last_report = None;
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
