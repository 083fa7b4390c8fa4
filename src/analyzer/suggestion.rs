//! Optimization suggestions and performance reports.

use super::metrics::EndpointMetrics;
use super::pattern::{Frequency, UsagePattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CACHE_HIT_RATE_TARGET: f64 = 0.5;
pub const COMPRESS_MIN_PAYLOAD: f64 = 2048.0;
pub const MERGE_MIN_RELATED: usize = 2;
pub const DEPRECATE_MIN_ERROR_RATE: f64 = 0.10;
pub const REPORT_TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Cache,
    Batch,
    Compress,
    Preload,
    Merge,
    Deprecate,
}

impl SuggestionKind {
    fn base_priority(&self) -> u8 {
        match self {
            SuggestionKind::Cache => 9,
            SuggestionKind::Batch => 8,
            SuggestionKind::Preload => 7,
            SuggestionKind::Compress => 6,
            SuggestionKind::Merge => 5,
            SuggestionKind::Deprecate => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// Estimated improvement, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedImpact {
    pub performance_gain: f64,
    pub bandwidth_savings: f64,
    pub server_load_reduction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSuggestion {
    pub kind: SuggestionKind,
    /// `METHOD:endpoint` metrics key.
    pub endpoint: String,
    pub description: String,
    pub priority: u8,
    pub impact: EstimatedImpact,
    pub effort: Effort,
}

impl OptimizationSuggestion {
    /// Endpoint path without the method prefix.
    pub fn path(&self) -> &str {
        self.endpoint
            .split_once(':')
            .map(|(_, p)| p)
            .unwrap_or(&self.endpoint)
    }
}

fn impact(performance_gain: f64, bandwidth_savings: f64, server_load_reduction: f64) -> EstimatedImpact {
    EstimatedImpact {
        performance_gain,
        bandwidth_savings,
        server_load_reduction,
    }
}

/// Suggestions for one endpoint; zero or more per pattern.
pub fn suggestions_for(metrics: &EndpointMetrics, pattern: &UsagePattern) -> Vec<OptimizationSuggestion> {
    let key = pattern.endpoint.clone();
    let high = pattern.frequency == Frequency::High;
    // High-frequency endpoints outrank others of the same kind.
    let bump = if high { 1 } else { 0 };
    let mut out = Vec::new();

    let mut push = |kind: SuggestionKind, description: String, impact: EstimatedImpact, effort: Effort| {
        out.push(OptimizationSuggestion {
            kind,
            endpoint: key.clone(),
            description,
            priority: kind.base_priority() + bump,
            impact,
            effort,
        });
    };

    if pattern.cacheable && metrics.cache_hit_rate < CACHE_HIT_RATE_TARGET {
        let miss = 1.0 - metrics.cache_hit_rate;
        push(
            SuggestionKind::Cache,
            format!(
                "Cache responses: {:.0}ms average latency with only {:.0}% cache hits",
                metrics.average_response_time_ms,
                metrics.cache_hit_rate * 100.0
            ),
            impact((miss * 80.0).round(), (miss * 50.0).round(), (miss * 60.0).round()),
            Effort::Low,
        );
    }
    if pattern.batchable && high {
        push(
            SuggestionKind::Batch,
            format!("Batch requests: {} calls with a stable success rate", metrics.total_requests),
            impact(30.0, 20.0, 40.0),
            Effort::Medium,
        );
    }
    if pattern.compressible && metrics.typical_payload_size > COMPRESS_MIN_PAYLOAD {
        push(
            SuggestionKind::Compress,
            format!(
                "Compress payloads averaging {:.0} bytes",
                metrics.typical_payload_size
            ),
            impact(10.0, 60.0, 5.0),
            Effort::Low,
        );
    }
    if pattern.critical && high {
        push(
            SuggestionKind::Preload,
            "Preload ahead of peak usage hours".to_string(),
            impact(40.0, 0.0, 0.0),
            Effort::Medium,
        );
    }
    if pattern.related_endpoints.len() > MERGE_MIN_RELATED && high {
        push(
            SuggestionKind::Merge,
            format!(
                "Merge with {} related endpoints into a combined call",
                pattern.related_endpoints.len()
            ),
            impact(25.0, 15.0, 30.0),
            Effort::High,
        );
    }
    if pattern.frequency == Frequency::Low && metrics.error_rate > DEPRECATE_MIN_ERROR_RATE {
        push(
            SuggestionKind::Deprecate,
            format!(
                "Rarely used with a {:.0}% error rate; consider deprecating",
                metrics.error_rate * 100.0
            ),
            impact(5.0, 5.0, 10.0),
            Effort::Medium,
        );
    }
    out
}

/// Priority descending; ties broken by kind then endpoint for a stable order.
pub fn sort_suggestions(suggestions: &mut [OptimizationSuggestion]) {
    suggestions.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.kind.cmp(&b.kind))
            .then(a.endpoint.cmp(&b.endpoint))
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub endpoint: String,
    pub total_requests: u64,
    pub average_response_time_ms: f64,
    pub success_rate: f64,
}

impl From<&EndpointMetrics> for EndpointSummary {
    fn from(m: &EndpointMetrics) -> Self {
        Self {
            endpoint: m.key(),
            total_requests: m.total_requests,
            average_response_time_ms: m.average_response_time_ms,
            success_rate: m.success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub generated_at_ms: u64,
    pub total_requests: u64,
    pub total_endpoints: usize,
    /// Weighted by each endpoint's request count.
    pub average_response_time_ms: f64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub total_data_transfer_bytes: u64,
    pub slowest_endpoints: Vec<EndpointSummary>,
    pub most_used_endpoints: Vec<EndpointSummary>,
    pub suggestions: Vec<OptimizationSuggestion>,
    pub recommendations: Vec<String>,
}

pub fn build_report(
    metrics: &[&EndpointMetrics],
    suggestions: Vec<OptimizationSuggestion>,
    generated_at_ms: u64,
) -> PerformanceReport {
    let total_requests: u64 = metrics.iter().map(|m| m.total_requests).sum();
    let weighted = |f: fn(&EndpointMetrics) -> f64| -> f64 {
        if total_requests == 0 {
            0.0
        } else {
            metrics
                .iter()
                .map(|m| f(m) * m.total_requests as f64)
                .sum::<f64>()
                / total_requests as f64
        }
    };
    let average_response_time_ms = weighted(|m| m.average_response_time_ms);
    let success_rate = weighted(|m| m.success_rate);
    let cache_hit_rate = weighted(|m| m.cache_hit_rate);

    let mut slowest: Vec<&EndpointMetrics> = metrics.to_vec();
    slowest.sort_by(|a, b| {
        b.average_response_time_ms
            .total_cmp(&a.average_response_time_ms)
            .then(a.key().cmp(&b.key()))
    });
    let mut most_used: Vec<&EndpointMetrics> = metrics.to_vec();
    most_used.sort_by(|a, b| {
        b.total_requests
            .cmp(&a.total_requests)
            .then(a.key().cmp(&b.key()))
    });

    let recommendations = recommendations(&suggestions, total_requests, success_rate);

    PerformanceReport {
        generated_at_ms,
        total_requests,
        total_endpoints: metrics.len(),
        average_response_time_ms,
        success_rate,
        cache_hit_rate,
        total_data_transfer_bytes: metrics.iter().map(|m| m.data_transfer_bytes).sum(),
        slowest_endpoints: slowest.into_iter().take(REPORT_TOP_N).map(Into::into).collect(),
        most_used_endpoints: most_used.into_iter().take(REPORT_TOP_N).map(Into::into).collect(),
        suggestions,
        recommendations,
    }
}

fn recommendations(
    suggestions: &[OptimizationSuggestion],
    total_requests: u64,
    success_rate: f64,
) -> Vec<String> {
    let mut counts: BTreeMap<SuggestionKind, usize> = BTreeMap::new();
    for s in suggestions {
        *counts.entry(s.kind).or_default() += 1;
    }

    let mut out: Vec<String> = counts
        .into_iter()
        .map(|(kind, n)| match kind {
            SuggestionKind::Cache => {
                format!("Enable response caching for {} slow, read-heavy endpoint(s)", n)
            }
            SuggestionKind::Batch => format!("Batch requests to {} high-traffic endpoint(s)", n),
            SuggestionKind::Compress => {
                format!("Compress payloads for {} endpoint(s) with large responses", n)
            }
            SuggestionKind::Preload => {
                format!("Preload {} critical endpoint(s) ahead of peak hours", n)
            }
            SuggestionKind::Merge => {
                format!("Consider merging {} endpoint(s) with many related calls", n)
            }
            SuggestionKind::Deprecate => {
                format!("Review {} rarely used endpoint(s) with high error rates", n)
            }
        })
        .collect();

    if total_requests > 0 && success_rate < 0.95 {
        out.push(format!(
            "Overall success rate is {:.1}%; investigate failing endpoints",
            success_rate * 100.0
        ));
    }
    if out.is_empty() {
        out.push("No optimization opportunities detected".to_string());
    }
    out
}
