//! Explicitly constructed optimizer context.
//!
//! [`OptimizerContext`] owns one analyzer, one cache and one batch processor
//! and wires them together: GET responses go through the cache, everything
//! else goes through the batcher, and every network call or cache hit is
//! recorded to the analyzer. `init` starts the background tasks and
//! `shutdown` stops them.
//!
//! ```rust,no_run
//! use api_traffic_optimizer::context::OptimizerContext;
//! use api_traffic_optimizer::transport::HttpTransport;
//! use std::sync::Arc;
//!
//! # async fn run() -> api_traffic_optimizer::Result<()> {
//! let ctx = OptimizerContext::builder()
//!     .transport(Arc::new(HttpTransport::with_base_url("https://api.example.com")?))
//!     .build()?;
//! ctx.init().await;
//! let feed = ctx.get("/api/feed", None).await?;
//! println!("{feed}");
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::analyzer::{PerformanceAnalyzer, PerformanceReport, RequestRecord, SuggestionKind};
use crate::batch::{BatchProcessor, EndpointThreshold, EnqueueOptions};
use crate::cache::{
    CacheKeyGenerator, EntryMetadata, PreloadCandidate, Revalidator, SetOptions, SmartCache,
    SnapshotStore,
};
use crate::config::OptimizerConfig;
use crate::telemetry::{noop_sink, ReportSink};
use crate::transport::{HttpMethod, HttpTransport, HttpTransportConfig, Transport};
use crate::types::Priority;
use crate::utils::{hour_of_day, lock, now_ms, InFlight};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request history older than this is pruned during maintenance.
const HISTORY_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// How long shutdown waits for flushed callers before flushing again.
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(50);

/// Marks cache entries fetched with per-request headers.
const HEADER_SCOPED_TAG: &str = "header_scoped";

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub headers: HashMap<String, String>,
    /// TTL for the cached response; defaults to the endpoint or cache TTL.
    pub cache_ttl: Option<Duration>,
    /// Bypass the cache for this GET (neither read nor written).
    pub skip_cache: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            timeout: self.timeout,
            headers: self.headers.clone(),
        }
    }
}

/// What one tuning pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningSummary {
    /// Endpoint paths that received a batch threshold override.
    pub batch_overrides: Vec<String>,
    /// `METHOD:endpoint` keys whose cache TTL was extended.
    pub extended_ttls: Vec<String>,
    /// Preload candidates registered, when a preload suggestion was present.
    pub preload_candidates: usize,
    /// Suggestions left for humans (compress, merge, deprecate).
    pub advisory: usize,
}

/// Refreshes stale cache entries by re-issuing their GET through the batcher.
struct BatchRevalidator {
    batcher: BatchProcessor,
}

#[async_trait]
impl Revalidator<Value> for BatchRevalidator {
    async fn revalidate(&self, key: &str, metadata: &EntryMetadata) -> Result<Option<Value>> {
        // The caller's headers are not kept, so a header-scoped entry cannot be refetched.
        if metadata.tags.contains_key(HEADER_SCOPED_TAG) {
            return Ok(None);
        }
        let Some(url) = metadata.tags.get("url") else {
            return Ok(None);
        };
        let data = match metadata.tags.get("data") {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        debug!(key, url = %url, "revalidating");
        let response = self
            .batcher
            .enqueue(
                HttpMethod::Get,
                url,
                data,
                EnqueueOptions::new().with_priority(Priority::Low),
            )
            .await?;
        Ok(Some(response.data))
    }
}

pub struct OptimizerContextBuilder {
    config: OptimizerConfig,
    transport: Option<Arc<dyn Transport>>,
    analyzer: Option<Arc<PerformanceAnalyzer>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    report_sink: Arc<dyn ReportSink>,
}

impl OptimizerContextBuilder {
    pub fn new() -> Self {
        Self {
            config: OptimizerConfig::default(),
            transport: None,
            analyzer: None,
            snapshot_store: None,
            report_sink: noop_sink(),
        }
    }

    pub fn config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an [`HttpTransport`] configured from the environment.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<PerformanceAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = sink;
        self
    }

    pub fn build(self) -> Result<OptimizerContext> {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(HttpTransportConfig::default())?),
        };
        let analyzer = self
            .analyzer
            .unwrap_or_else(|| Arc::new(PerformanceAnalyzer::new()));
        let batcher = BatchProcessor::with_analyzer(
            Arc::clone(&transport),
            self.config.batch.clone(),
            Arc::clone(&analyzer),
        );

        let mut cache = SmartCache::<Value>::builder(self.config.cache.clone())
            .analyzer(Arc::clone(&analyzer))
            .revalidator(Arc::new(BatchRevalidator {
                batcher: batcher.clone(),
            }));
        if let Some(store) = self.snapshot_store {
            cache = cache.store(store);
        }

        Ok(OptimizerContext {
            config: self.config,
            analyzer,
            cache: cache.build(),
            batcher,
            report_sink: self.report_sink,
            keys: CacheKeyGenerator::new(),
            tasks: Mutex::new(Vec::new()),
            active: InFlight::new(),
            initialized: AtomicBool::new(false),
        })
    }
}

impl Default for OptimizerContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The traffic optimization layer as one explicitly constructed object.
pub struct OptimizerContext {
    config: OptimizerConfig,
    analyzer: Arc<PerformanceAnalyzer>,
    cache: SmartCache<Value>,
    batcher: BatchProcessor,
    report_sink: Arc<dyn ReportSink>,
    keys: CacheKeyGenerator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Requests between entry and their cache write.
    active: InFlight,
    initialized: AtomicBool,
}

impl OptimizerContext {
    pub fn builder() -> OptimizerContextBuilder {
        OptimizerContextBuilder::new()
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
    pub fn analyzer(&self) -> &Arc<PerformanceAnalyzer> {
        &self.analyzer
    }
    pub fn cache(&self) -> &SmartCache<Value> {
        &self.cache
    }
    pub fn batcher(&self) -> &BatchProcessor {
        &self.batcher
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Restores the cache snapshot and starts maintenance, tuning and
    /// reporting. Returns the number of restored cache entries; a second call
    /// does nothing.
    pub async fn init(&self) -> usize {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let restored = match self.cache.restore().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cache snapshot could not be loaded, starting cold");
                0
            }
        };

        let mut tasks = Vec::new();
        tasks.push(self.spawn_maintenance(self.config.maintenance_interval()));
        if let Some(every) = self.config.tuning_interval() {
            tasks.push(self.spawn_tuning(every));
        }
        if let Some(every) = self.config.report_interval() {
            tasks.push(self.spawn_reporting(every));
        }
        let n = tasks.len();
        lock(&self.tasks).extend(tasks);
        info!(restored, background_tasks = n, "optimizer context initialized");
        restored
    }

    fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let batcher = self.batcher.clone();
        let analyzer = Arc::clone(&self.analyzer);
        let keys = self.keys.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.run_maintenance().await;
                let limit = cache.config().maintenance_sweep_limit;
                let cutoff = now_ms().saturating_sub(HISTORY_RETENTION_MS);
                analyzer.prune_history(cutoff, limit);
                let due = cache.due_preloads(hour_of_day(now_ms()));
                warm(&cache, &batcher, &keys, due).await;
            }
        })
    }

    fn spawn_tuning(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let batcher = self.batcher.clone();
        let analyzer = Arc::clone(&self.analyzer);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                apply_tuning(&analyzer, &cache, &batcher);
            }
        })
    }

    fn spawn_reporting(&self, every: Duration) -> JoinHandle<()> {
        let analyzer = Arc::clone(&self.analyzer);
        let sink = Arc::clone(&self.report_sink);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = analyzer.report();
                if let Err(e) = sink.report(&report).await {
                    warn!(error = %e, "report sink failed");
                }
            }
        })
    }

    /// Stops background tasks, flushes pending batches and persists the cache
    /// once every flushed request has stored its response.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for t in &tasks {
            t.abort();
        }
        let mut flushed = 0;
        loop {
            flushed += self.batcher.flush_all().await;
            if tokio::time::timeout(SHUTDOWN_SETTLE, self.active.wait_idle())
                .await
                .is_ok()
            {
                break;
            }
            debug!(active = self.active.current(), "requests still settling");
        }
        if let Err(e) = self.cache.persist().await {
            warn!(error = %e, "final cache snapshot failed");
        }
        if let Err(e) = self.report_sink.close().await {
            warn!(error = %e, "report sink close failed");
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!(flushed, "optimizer context shut down");
    }

    /// Issues a request through the cache (GET only) and the batcher.
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let _active = self.active.enter();
        let cacheable = method.is_read_only() && !options.skip_cache;
        let key = self
            .keys
            .generate_with_headers(method, url, data.as_ref(), &options.headers);

        if cacheable {
            if let Some(hit) = self.cache.get(key.as_str()) {
                let bytes = serde_json::to_vec(&hit).map(|b| b.len() as u64).unwrap_or(0);
                self.analyzer.record(
                    RequestRecord::new(method, url)
                        .with_cached(true)
                        .with_response_bytes(bytes),
                );
                return Ok(hit);
            }
        }

        let tags_data = data.as_ref().map(|d| d.to_string());
        let response = self
            .batcher
            .enqueue(method, url, data, options.enqueue_options())
            .await?;

        if cacheable {
            let mut set = SetOptions::new()
                .with_priority(options.priority)
                .with_tag("url", url);
            if let Some(endpoint) = key.endpoint.clone() {
                set = set.with_endpoint(endpoint);
            }
            if let Some(ttl) = options.cache_ttl {
                set = set.with_ttl(ttl);
            }
            if let Some(d) = tags_data {
                set = set.with_tag("data", d);
            }
            if !options.headers.is_empty() {
                set = set.with_tag(HEADER_SCOPED_TAG, "true");
            }
            self.cache.set(key.as_str(), response.data.clone(), set);
        } else if !method.is_read_only() {
            let read_key = crate::analyzer::metrics_key(
                HttpMethod::Get,
                &crate::analyzer::endpoint_of(url),
            );
            let dropped = self.cache.invalidate_endpoint(&read_key);
            if dropped > 0 {
                debug!(endpoint = %read_key, dropped, "invalidated cached reads after write");
            }
        }
        Ok(response.data)
    }

    /// Like [`request`](Self::request), deserializing the response into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request(method, url, data, options).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::validation_with_context(
                format!("response does not match the expected type: {}", e),
                ErrorContext::new()
                    .with_field_path(url)
                    .with_source("optimizer_context"),
            )
        })
    }

    pub async fn get(&self, url: &str, data: Option<Value>) -> Result<Value> {
        self.request(HttpMethod::Get, url, data, RequestOptions::new()).await
    }
    pub async fn post(&self, url: &str, data: Option<Value>) -> Result<Value> {
        self.request(HttpMethod::Post, url, data, RequestOptions::new()).await
    }
    pub async fn put(&self, url: &str, data: Option<Value>) -> Result<Value> {
        self.request(HttpMethod::Put, url, data, RequestOptions::new()).await
    }
    pub async fn delete(&self, url: &str, data: Option<Value>) -> Result<Value> {
        self.request(HttpMethod::Delete, url, data, RequestOptions::new()).await
    }

    /// Applies current analyzer suggestions to the batcher and cache.
    pub fn tune(&self) -> TuningSummary {
        apply_tuning(&self.analyzer, &self.cache, &self.batcher)
    }

    /// Fetches due preload candidates that are not already cached.
    pub async fn preload_now(&self) -> usize {
        let due = self.cache.due_preloads(hour_of_day(now_ms()));
        warm(&self.cache, &self.batcher, &self.keys, due).await
    }

    pub fn report(&self) -> PerformanceReport {
        self.analyzer.report()
    }

    pub fn export_metrics(&self) -> String {
        self.analyzer.export_metrics()
    }
}

/// Batch suggestions double the global batch size and stretch the wait by
/// half; cache suggestions double the default TTL for that endpoint. Both are
/// computed from the base config, so repeated passes are idempotent.
fn apply_tuning(
    analyzer: &PerformanceAnalyzer,
    cache: &SmartCache<Value>,
    batcher: &BatchProcessor,
) -> TuningSummary {
    let mut summary = TuningSummary::default();
    let mut wants_preload = false;
    let batch_config = batcher.config();
    let base_ttl = cache.config().ttl();

    for s in analyzer.suggest() {
        match s.kind {
            SuggestionKind::Batch => {
                let path = s.path().to_string();
                batcher.set_endpoint_override(
                    path.clone(),
                    EndpointThreshold {
                        max_batch_size: Some(batch_config.max_batch_size.saturating_mul(2)),
                        max_wait_time_ms: Some(
                            (batch_config.max_wait_time_ms as f64 * 1.5).round() as u64,
                        ),
                    },
                );
                summary.batch_overrides.push(path);
            }
            SuggestionKind::Cache => {
                cache.set_endpoint_ttl(s.endpoint.clone(), base_ttl * 2);
                summary.extended_ttls.push(s.endpoint);
            }
            SuggestionKind::Preload => wants_preload = true,
            _ => summary.advisory += 1,
        }
    }
    if wants_preload {
        summary.preload_candidates = cache.refresh_preload_candidates();
    }
    if !summary.batch_overrides.is_empty() || !summary.extended_ttls.is_empty() {
        info!(
            batch_overrides = summary.batch_overrides.len(),
            extended_ttls = summary.extended_ttls.len(),
            preload_candidates = summary.preload_candidates,
            "tuning applied"
        );
    }
    summary
}

/// Best-effort warm-up; failures are logged and skipped.
async fn warm(
    cache: &SmartCache<Value>,
    batcher: &BatchProcessor,
    keys: &CacheKeyGenerator,
    due: Vec<PreloadCandidate>,
) -> usize {
    let mut warmed = 0;
    for c in due {
        let key = keys.generate(c.method, &c.endpoint, None);
        if cache.has(key.as_str()) {
            continue;
        }
        match batcher
            .enqueue(
                c.method,
                &c.endpoint,
                None,
                EnqueueOptions::new().with_priority(Priority::Low),
            )
            .await
        {
            Ok(response) => {
                let stored = cache.set(
                    key.as_str(),
                    response.data,
                    SetOptions::new()
                        .with_priority(Priority::Low)
                        .with_endpoint(c.key.clone())
                        .with_tag("url", c.endpoint.clone()),
                );
                if stored.is_stored() {
                    warmed += 1;
                }
            }
            Err(e) => warn!(endpoint = %c.key, error = %e, "preload failed"),
        }
    }
    if warmed > 0 {
        debug!(warmed, "preloaded endpoints");
    }
    warmed
}
