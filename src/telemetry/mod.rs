//! Logging setup and performance-report sinks.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`init_tracing`] | Installs a `tracing-subscriber` fmt subscriber (`RUST_LOG` wins) |
//! | [`ReportSink`] | Destination for periodic [`PerformanceReport`]s |
//! | [`NoopReportSink`] | Default sink, drops reports |
//! | [`InMemoryReportSink`] | Bounded in-memory sink for tests and dashboards |
//! | [`LogReportSink`] | Emits a summary of each report through `tracing` |
//! | [`CompositeReportSink`] | Fans a report out to several sinks |

use crate::analyzer::PerformanceReport;
use crate::utils::lock;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber, writing to stderr. Later calls are no-ops.
///
/// `default_filter` (e.g. `"info"` or `"api_traffic_optimizer=debug"`) applies
/// only when `RUST_LOG` is unset.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, report: &PerformanceReport) -> Result<()>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NoopReportSink;

#[async_trait]
impl ReportSink for NoopReportSink {
    async fn report(&self, _: &PerformanceReport) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ReportSink> {
    Arc::new(NoopReportSink)
}

/// Keeps the latest `max_reports` reports.
pub struct InMemoryReportSink {
    reports: Mutex<VecDeque<PerformanceReport>>,
    max_reports: usize,
}

impl InMemoryReportSink {
    pub fn new(max: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            max_reports: max.max(1),
        }
    }
    pub fn reports(&self) -> Vec<PerformanceReport> {
        lock(&self.reports).iter().cloned().collect()
    }
    pub fn latest(&self) -> Option<PerformanceReport> {
        lock(&self.reports).back().cloned()
    }
    pub fn clear(&self) {
        lock(&self.reports).clear();
    }
    pub fn len(&self) -> usize {
        lock(&self.reports).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReportSink for InMemoryReportSink {
    async fn report(&self, report: &PerformanceReport) -> Result<()> {
        let mut reports = lock(&self.reports);
        reports.push_back(report.clone());
        while reports.len() > self.max_reports {
            reports.pop_front();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn report(&self, report: &PerformanceReport) -> Result<()> {
        info!(
            total_requests = report.total_requests,
            endpoints = report.total_endpoints,
            avg_response_ms = report.average_response_time_ms,
            success_rate = report.success_rate,
            cache_hit_rate = report.cache_hit_rate,
            suggestions = report.suggestions.len(),
            "performance report"
        );
        for rec in &report.recommendations {
            info!(recommendation = %rec);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CompositeReportSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl CompositeReportSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ReportSink for CompositeReportSink {
    async fn report(&self, report: &PerformanceReport) -> Result<()> {
        for s in &self.sinks {
            if let Err(e) = s.report(report).await {
                warn!(error = %e, "report sink failed");
            }
        }
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
