//! The batch processor.

use super::combine::{is_combinable, merge_params, strip_query};
use super::config::{BatchConfig, BatchConfigUpdate, EndpointThreshold};
use super::grouping::batch_key;
use super::request::{BatchableRequest, EnqueueOptions, Outcome};
use super::stats::BatchStats;
use crate::analyzer::{endpoint_of, PerformanceAnalyzer, RequestRecord};
use crate::transport::{
    canonical_headers, HttpMethod, Transport, TransportError, TransportRequest, TransportResponse,
};
use crate::utils::{lock, InFlight, InFlightGuard};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct PendingBatch {
    generation: u64,
    requests: Vec<BatchableRequest>,
    created_at: Instant,
    timer: Option<JoinHandle<()>>,
}

/// Read-only view of a pending batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatchInfo {
    pub key: String,
    pub requests: usize,
    pub waiters: usize,
    pub age: Duration,
    pub timer_armed: bool,
}

#[derive(Default)]
struct ProcessorState {
    batches: HashMap<String, PendingBatch>,
    next_generation: u64,
    stats: BatchStats,
}

struct Inner {
    config: ArcSwap<BatchConfig>,
    transport: Arc<dyn Transport>,
    analyzer: Option<Arc<PerformanceAnalyzer>>,
    state: Mutex<ProcessorState>,
    /// Flushes running on detached tasks (size trigger or timer).
    in_flight: InFlight,
}

/// Groups, deduplicates and flushes requests onto a [`Transport`].
///
/// Each batch key owns one pending list and at most one flush timer. A batch
/// flushes when it reaches its size threshold or when its timer fires,
/// whichever comes first. Clones share the same pending batches.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<Inner>,
}

enum Slot {
    Single(BatchableRequest),
    Group(String),
}

impl BatchProcessor {
    pub fn new(transport: Arc<dyn Transport>, config: BatchConfig) -> Self {
        Self::build(transport, config, None)
    }

    /// Every network call made by a flush is recorded to `analyzer`.
    pub fn with_analyzer(
        transport: Arc<dyn Transport>,
        config: BatchConfig,
        analyzer: Arc<PerformanceAnalyzer>,
    ) -> Self {
        Self::build(transport, config, Some(analyzer))
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: BatchConfig,
        analyzer: Option<Arc<PerformanceAnalyzer>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                transport,
                analyzer,
                state: Mutex::new(ProcessorState::default()),
                in_flight: InFlight::new(),
            }),
        }
    }

    pub fn config(&self) -> Arc<BatchConfig> {
        self.inner.config.load_full()
    }

    /// Submits a request and waits for its outcome.
    ///
    /// An equivalent pending request (same method, url, data and headers)
    /// absorbs this caller instead of adding a second entry. Failures carry the same
    /// [`TransportError`] a direct call would produce.
    pub async fn enqueue(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: EnqueueOptions,
    ) -> Result<TransportResponse> {
        let config = self.inner.config.load_full();
        let timeout = options.timeout;

        let (rx, ready) = {
            let mut guard = lock(&self.inner.state);
            let st = &mut *guard;

            let attached = if config.enable_deduplication {
                st.batches
                    .values_mut()
                    .flat_map(|b| b.requests.iter_mut())
                    .find(|r| r.is_equivalent(method, url, data.as_ref(), &options.headers))
                    .map(|r| {
                        debug!(id = %r.id, url, "attached to pending request");
                        r.attach()
                    })
            } else {
                None
            };

            match attached {
                Some(rx) => {
                    st.stats.deduplicated_requests += 1;
                    (rx, None)
                }
                None => self.push_request(st, &config, method, url, data, options),
            }
        };

        if let Some((key, batch, flight)) = ready {
            let processor = self.clone();
            tokio::spawn(async move {
                processor.execute_batch(key, batch).await;
                drop(flight);
            });
        }

        Self::await_outcome(rx, timeout).await
    }

    fn push_request(
        &self,
        st: &mut ProcessorState,
        config: &BatchConfig,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: EnqueueOptions,
    ) -> (oneshot::Receiver<Outcome>, Option<(String, PendingBatch, InFlightGuard)>) {
        let mut request = BatchableRequest::new(method, url, data, options);
        let rx = request.attach();
        let key = batch_key(
            config.grouping_strategy,
            method,
            url,
            request.priority,
            request.data.is_some(),
        );
        let (max_size, max_wait) = config.thresholds_for(&endpoint_of(url));
        debug!(id = %request.id, key = %key, "request enqueued");

        st.next_generation += 1;
        let generation = st.next_generation;
        let batch = st.batches.entry(key.clone()).or_insert_with(|| PendingBatch {
            generation,
            requests: Vec::new(),
            created_at: Instant::now(),
            timer: None,
        });
        batch.requests.push(request);

        if batch.requests.len() >= max_size {
            let mut full = st.batches.remove(&key);
            if let Some(timer) = full.as_mut().and_then(|b| b.timer.take()) {
                timer.abort();
            }
            debug!(key = %key, max_size, "batch full, flushing");
            return (rx, full.map(|b| (key, b, self.inner.in_flight.enter())));
        }

        if batch.timer.is_none() {
            batch.timer = Some(self.arm_timer(key, batch.generation, max_wait));
        }
        (rx, None)
    }

    fn arm_timer(&self, key: String, generation: u64, wait: Duration) -> JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // The timer task runs the flush itself, so it must not abort its own handle.
            // Entered under the state lock so `flush_all` never misses a batch
            // that has left the pending map but not yet reached the transport.
            let taken = {
                let mut st = lock(&processor.inner.state);
                Self::remove_batch(&mut st, &key, Some(generation), false)
                    .map(|batch| (batch, processor.inner.in_flight.enter()))
            };
            if let Some((batch, flight)) = taken {
                processor.execute_batch(key, batch).await;
                drop(flight);
            }
        })
    }

    fn take_batch(&self, key: &str, generation: Option<u64>, abort_timer: bool) -> Option<PendingBatch> {
        let mut st = lock(&self.inner.state);
        Self::remove_batch(&mut st, key, generation, abort_timer)
    }

    fn remove_batch(
        st: &mut ProcessorState,
        key: &str,
        generation: Option<u64>,
        abort_timer: bool,
    ) -> Option<PendingBatch> {
        let matches = st
            .batches
            .get(key)
            .map(|b| generation.map_or(true, |g| b.generation == g))
            .unwrap_or(false);
        if !matches {
            return None;
        }
        let mut batch = st.batches.remove(key)?;
        if let Some(timer) = batch.timer.take() {
            if abort_timer {
                timer.abort();
            }
        }
        Some(batch)
    }

    async fn await_outcome(
        rx: oneshot::Receiver<Outcome>,
        timeout: Option<Duration>,
    ) -> Result<TransportResponse> {
        let received = match timeout {
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(r) => r,
                Err(_) => return Err(TransportError::timeout(t).into()),
            },
            None => rx.await,
        };
        match received {
            Ok(outcome) => outcome.map_err(Error::from),
            Err(_) => Err(Error::runtime_with_context(
                "request dropped before its batch completed",
                ErrorContext::new().with_source("batch_processor"),
            )),
        }
    }

    /// Flushes one pending batch now. Returns the number of requests flushed.
    pub async fn flush(&self, key: &str) -> usize {
        match self.take_batch(key, None, true) {
            Some(batch) => {
                let n = batch.requests.len();
                self.execute_batch(key.to_string(), batch).await;
                n
            }
            None => 0,
        }
    }

    /// Flushes every pending batch and waits for all of them, including
    /// flushes already running on timer or size-trigger tasks.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(String, PendingBatch)> = {
            let mut st = lock(&self.inner.state);
            st.batches.drain().collect()
        };
        let mut n = 0;
        let mut flushes = Vec::with_capacity(drained.len());
        for (key, mut batch) in drained {
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }
            n += batch.requests.len();
            flushes.push(self.execute_batch(key, batch));
        }
        join_all(flushes).await;
        self.inner.in_flight.wait_idle().await;
        if n > 0 {
            info!(requests = n, "flushed all pending batches");
        }
        n
    }

    /// Flushes currently running on detached tasks.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.current()
    }

    async fn execute_batch(&self, key: String, batch: PendingBatch) {
        let config = self.inner.config.load_full();
        let started = Instant::now();
        let size = batch.requests.len();
        let total_wait: Duration = batch
            .requests
            .iter()
            .map(|r| started.saturating_duration_since(r.enqueued_at))
            .sum();

        let (reads, writes): (Vec<_>, Vec<_>) = batch
            .requests
            .into_iter()
            .partition(|r| r.method.is_read_only());

        let ((read_calls, combined), write_calls) =
            tokio::join!(self.execute_reads(reads, &config), self.execute_writes(writes));

        let duration = started.elapsed();
        {
            let mut st = lock(&self.inner.state);
            st.stats
                .record_batch(size, total_wait, duration, config.assumed_request_cost_ms);
            st.stats.network_calls += read_calls + write_calls;
            st.stats.combined_calls += combined;
        }
        debug!(
            key = %key,
            size,
            calls = read_calls + write_calls,
            duration_ms = duration.as_millis() as u64,
            "batch flushed"
        );
    }

    /// Returns `(network_calls, combined_calls)`.
    async fn execute_reads(&self, reads: Vec<BatchableRequest>, config: &BatchConfig) -> (u64, u64) {
        let mut slots: Vec<Slot> = Vec::new();
        let mut groups: HashMap<String, Vec<BatchableRequest>> = HashMap::new();
        for r in reads {
            if !is_combinable(&r.url, &config.combinable_endpoints) {
                slots.push(Slot::Single(r));
                continue;
            }
            let group_key = format!("{}|{:?}", strip_query(&r.url), canonical_headers(&r.headers));
            let group = groups.entry(group_key.clone()).or_default();
            if group.is_empty() {
                slots.push(Slot::Group(group_key));
            }
            group.push(r);
        }

        let mut calls: Vec<BoxFuture<'_, (u64, u64)>> = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Single(r) => calls.push(Box::pin(async move {
                    self.execute_single(r).await;
                    (1, 0)
                })),
                Slot::Group(k) => {
                    let mut members = groups.remove(&k).unwrap_or_default();
                    if members.len() == 1 {
                        let r = members.remove(0);
                        calls.push(Box::pin(async move {
                            self.execute_single(r).await;
                            (1, 0)
                        }));
                    } else if !members.is_empty() {
                        calls.push(Box::pin(self.execute_combined(members)));
                    }
                }
            }
        }

        join_all(calls)
            .await
            .into_iter()
            .fold((0, 0), |(c, m), (dc, dm)| (c + dc, m + dm))
    }

    /// One GET for the whole group; on failure each member is retried on its own.
    async fn execute_combined(&self, group: Vec<BatchableRequest>) -> (u64, u64) {
        let base = strip_query(&group[0].url).to_string();
        let params = merge_params(group.iter().map(|r| (r.url.as_str(), r.data.as_ref())));
        let data = if params.is_empty() {
            None
        } else {
            Some(Value::Object(params))
        };
        let mut request = TransportRequest::new(HttpMethod::Get, base.clone()).with_data(data);
        request.headers = group[0].headers.clone();

        debug!(url = %base, merged = group.len(), "combined GET");
        match self.call(request).await {
            Ok(response) => {
                let outcome: Outcome = Ok(response);
                for r in group {
                    r.resolve(&outcome);
                }
                (1, 1)
            }
            Err(e) => {
                warn!(url = %base, error = %e, "combined GET failed, falling back to individual requests");
                let n = group.len() as u64;
                join_all(group.into_iter().map(|r| self.execute_single(r))).await;
                (1 + n, 0)
            }
        }
    }

    /// Mutations run one after another, in insertion order.
    async fn execute_writes(&self, writes: Vec<BatchableRequest>) -> u64 {
        let n = writes.len() as u64;
        for r in writes {
            self.execute_single(r).await;
        }
        n
    }

    async fn execute_single(&self, request: BatchableRequest) {
        let outcome = self.call(request.to_transport()).await;
        request.resolve(&outcome);
    }

    async fn call(&self, request: TransportRequest) -> Outcome {
        let method = request.method;
        let url = request.url.clone();
        let started = Instant::now();
        let outcome = self.inner.transport.execute(request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(analyzer) = &self.inner.analyzer {
            let bytes = match &outcome {
                Ok(r) => serde_json::to_vec(&r.data).map(|b| b.len() as u64).unwrap_or(0),
                Err(_) => 0,
            };
            analyzer.record(
                RequestRecord::new(method, url.as_str())
                    .with_duration_ms(elapsed_ms)
                    .with_success(outcome.is_ok())
                    .with_response_bytes(bytes),
            );
        }
        if let Err(e) = &outcome {
            debug!(method = %method, url = %url, error = %e, "request failed");
        }
        outcome
    }

    /// Pending logical requests across all batches.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state)
            .batches
            .values()
            .map(|b| b.requests.len())
            .sum()
    }

    pub fn pending_batches(&self) -> Vec<PendingBatchInfo> {
        let st = lock(&self.inner.state);
        let mut out: Vec<PendingBatchInfo> = st
            .batches
            .iter()
            .map(|(key, b)| PendingBatchInfo {
                key: key.clone(),
                requests: b.requests.len(),
                waiters: b.requests.iter().map(|r| r.waiter_count()).sum(),
                age: b.created_at.elapsed(),
                timer_armed: b.timer.is_some(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn stats(&self) -> BatchStats {
        lock(&self.inner.state).stats.clone()
    }

    /// Swaps in an updated config; pending batches keep their armed timers.
    pub fn update_config(&self, update: &BatchConfigUpdate) -> Result<()> {
        let mut next = (*self.inner.config.load_full()).clone();
        next.apply(update);
        next.validate()?;
        info!(
            max_batch_size = next.max_batch_size,
            max_wait_time_ms = next.max_wait_time_ms,
            grouping = ?next.grouping_strategy,
            "batch config updated"
        );
        self.inner.config.store(Arc::new(next));
        Ok(())
    }

    pub fn set_endpoint_override(&self, endpoint: impl Into<String>, threshold: EndpointThreshold) {
        let endpoint = endpoint.into();
        self.inner.config.rcu(|current| {
            let mut next = (**current).clone();
            next.endpoint_overrides.insert(endpoint.clone(), threshold);
            next
        });
        debug!(endpoint = %endpoint, ?threshold, "endpoint threshold override installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Echo {
        async fn execute(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.seen).push(request.clone());
            if request.url.contains("fail") {
                return Err(TransportError::Status {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(TransportResponse::ok(json!({"url": request.url, "data": request.data})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let transport = Echo::new();
        let processor = BatchProcessor::new(
            transport.clone(),
            BatchConfig::new().with_max_wait_time(Duration::from_millis(100)),
        );
        let p = processor.clone();
        let handle = tokio::spawn(async move { p.enqueue(HttpMethod::Get, "/a", None, EnqueueOptions::new()).await });
        tokio::task::yield_now().await;
        assert_eq!(processor.pending_count(), 1);
        assert!(processor.pending_batches()[0].timer_armed);

        let resp = handle.await.unwrap().unwrap();
        assert_eq!(resp.data["url"], "/a");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.pending_count(), 0);
        assert_eq!(processor.stats().total_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rejects_only_its_request() {
        let transport = Echo::new();
        let processor = BatchProcessor::new(transport.clone(), BatchConfig::new().with_max_batch_size(2));
        let (ok, bad) = tokio::join!(
            processor.enqueue(HttpMethod::Post, "/ok", Some(json!({"n": 1})), EnqueueOptions::new()),
            processor.enqueue(HttpMethod::Post, "/fail", Some(json!({"n": 2})), EnqueueOptions::new()),
        );
        assert!(ok.is_ok());
        match bad.unwrap_err() {
            Error::Transport(TransportError::Status { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_drains_and_disarms() {
        let transport = Echo::new();
        let processor = BatchProcessor::new(
            transport.clone(),
            BatchConfig::new().with_max_wait_time(Duration::from_secs(60)),
        );
        let p = processor.clone();
        let waiting = tokio::spawn(async move { p.enqueue(HttpMethod::Delete, "/item/1", None, EnqueueOptions::new()).await });
        tokio::task::yield_now().await;
        assert_eq!(processor.flush_all().await, 1);
        assert!(waiting.await.unwrap().is_ok());
        assert!(processor.pending_batches().is_empty());
    }

    struct Slow;

    #[async_trait]
    impl Transport for Slow {
        async fn execute(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(TransportResponse::ok(json!({"url": request.url})))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_waits_for_timer_flush_in_progress() {
        let processor = BatchProcessor::new(
            Arc::new(Slow),
            BatchConfig::new().with_max_wait_time(Duration::from_millis(10)),
        );
        let p = processor.clone();
        let waiting = tokio::spawn(async move { p.enqueue(HttpMethod::Get, "/slow", None, EnqueueOptions::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processor.pending_count(), 0);
        assert_eq!(processor.in_flight(), 1);

        let started = Instant::now();
        assert_eq!(processor.flush_all().await, 0);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(processor.in_flight(), 0);
        assert!(waiting.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_override_changes_threshold() {
        let transport = Echo::new();
        let processor = BatchProcessor::new(
            transport.clone(),
            BatchConfig::new()
                .with_max_batch_size(10)
                .with_max_wait_time(Duration::from_secs(60)),
        );
        processor.set_endpoint_override(
            "/api/feed",
            EndpointThreshold {
                max_batch_size: Some(1),
                max_wait_time_ms: None,
            },
        );
        processor
            .enqueue(HttpMethod::Get, "/api/feed", None, EnqueueOptions::new())
            .await
            .unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let processor = BatchProcessor::new(Echo::new(), BatchConfig::new());
        assert!(processor
            .update_config(&BatchConfigUpdate {
                max_batch_size: Some(0),
                ..Default::default()
            })
            .is_err());
        processor
            .update_config(&BatchConfigUpdate {
                max_batch_size: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(processor.config().max_batch_size, 3);
    }
}
