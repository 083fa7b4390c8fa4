//! The adaptive response cache.

use super::codec;
use super::config::{CacheConfig, CacheConfigUpdate, EvictionStrategy};
use super::entry::{CacheEntry, EntryMetadata, StoredValue};
use super::eviction::eviction_order;
use super::persistence::{CacheSnapshot, SnapshotStore};
use super::preload::{select_candidates, PreloadCandidate, PRELOAD_MIN_SUCCESS_RATE};
use crate::analyzer::PerformanceAnalyzer;
use crate::types::Priority;
use crate::utils::{lock, now_ms};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use lru::LruCache;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounds every value type the cache can hold.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Refreshes an expired entry in the background under stale-while-revalidate.
///
/// `Ok(None)` leaves the stale entry alone.
#[async_trait]
pub trait Revalidator<V>: Send + Sync {
    async fn revalidate(&self, key: &str, metadata: &EntryMetadata) -> Result<Option<V>>;
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the endpoint and default TTLs.
    pub ttl: Option<Duration>,
    pub priority: Priority,
    /// `METHOD:endpoint` key; enables adaptive scoring and endpoint TTLs.
    pub endpoint: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    fn from_metadata(metadata: &EntryMetadata) -> Self {
        Self {
            ttl: None,
            priority: metadata.priority,
            endpoint: metadata.endpoint.clone(),
            tags: metadata.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Serialization(String),
    Compression(String),
    Capacity { required_bytes: usize, max_bytes: usize },
}

/// Result of a `set`; failures to admit an entry are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Stored,
    Skipped(SkipReason),
}

impl SetOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, SetOutcome::Stored)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub sets: u64,
    pub skipped: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_entries: usize,
    pub total_size_bytes: usize,
    pub compressed_entries: usize,
    pub hit_rate: f64,
    pub average_entry_age_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub revalidated: usize,
    pub expired: usize,
    pub persisted: bool,
    pub stats: CacheStats,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    stale_hits: u64,
    sets: u64,
    skipped: u64,
    evictions: u64,
    expirations: u64,
}

struct CacheState<V> {
    entries: LruCache<String, CacheEntry<V>>,
    total_bytes: usize,
    counters: Counters,
    preload: Vec<PreloadCandidate>,
    endpoint_ttls: HashMap<String, u64>,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Removes expired entries among the `limit` least recently used. With
    /// stale-while-revalidate on, an entry is kept until its stale copy has
    /// been served or it is twice its TTL old.
    fn sweep(&mut self, now: u64, stale_while_revalidate: bool, limit: usize) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .rev()
            .take(limit)
            .filter(|(_, e)| {
                if !e.is_expired(now) {
                    return false;
                }
                !stale_while_revalidate
                    || e.stale_served
                    || e.age_ms(now) > e.ttl_ms.saturating_mul(2)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        self.counters.expirations += doomed.len() as u64;
        doomed.len()
    }
}

struct Revalidated<V> {
    key: String,
    value: V,
    options: SetOptions,
}

struct Inner<V> {
    config: ArcSwap<CacheConfig>,
    state: Mutex<CacheState<V>>,
    analyzer: Option<Arc<PerformanceAnalyzer>>,
    store: Option<Arc<dyn SnapshotStore>>,
    revalidator: Option<Arc<dyn Revalidator<V>>>,
    revalidated_tx: mpsc::UnboundedSender<Revalidated<V>>,
    revalidated_rx: Mutex<mpsc::UnboundedReceiver<Revalidated<V>>>,
}

pub struct SmartCacheBuilder<V> {
    config: CacheConfig,
    analyzer: Option<Arc<PerformanceAnalyzer>>,
    store: Option<Arc<dyn SnapshotStore>>,
    revalidator: Option<Arc<dyn Revalidator<V>>>,
}

impl<V: CacheValue> SmartCacheBuilder<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            analyzer: None,
            store: None,
            revalidator: None,
        }
    }

    /// Metrics source for adaptive scoring and preload selection.
    pub fn analyzer(mut self, analyzer: Arc<PerformanceAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn revalidator(mut self, revalidator: Arc<dyn Revalidator<V>>) -> Self {
        self.revalidator = Some(revalidator);
        self
    }

    pub fn build(self) -> SmartCache<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        SmartCache {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(self.config),
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    total_bytes: 0,
                    counters: Counters::default(),
                    preload: Vec::new(),
                    endpoint_ttls: HashMap::new(),
                }),
                analyzer: self.analyzer,
                store: self.store,
                revalidator: self.revalidator,
                revalidated_tx: tx,
                revalidated_rx: Mutex::new(rx),
            }),
        }
    }
}

/// Size-bounded cache with TTLs, pluggable eviction and stale-while-revalidate.
///
/// Cloning is cheap and every clone shares the same entries. All mutation
/// happens inside short synchronous sections; background revalidations
/// report back through a channel that the cache drains itself.
pub struct SmartCache<V = serde_json::Value> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SmartCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: CacheValue> SmartCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        SmartCacheBuilder::new(config).build()
    }

    pub fn builder(config: CacheConfig) -> SmartCacheBuilder<V> {
        SmartCacheBuilder::new(config)
    }

    pub fn config(&self) -> Arc<CacheConfig> {
        self.inner.config.load_full()
    }

    /// Returns a live value and promotes it to most recently used.
    ///
    /// An expired entry is handed out once more when stale-while-revalidate is
    /// on, and a background refresh is scheduled; otherwise it is a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.drain_revalidations();
        let config = self.inner.config.load();
        let now = now_ms();

        let mut st = lock(&self.inner.state);
        // Peek first: only a live hit moves the entry to the most recently used end.
        let Some(entry) = st.entries.peek_mut(key) else {
            st.counters.misses += 1;
            debug!(key, "cache miss");
            return None;
        };

        if !entry.is_expired(now) {
            entry.touch(now);
            match entry.decode() {
                Ok(v) => {
                    st.entries.promote(key);
                    st.counters.hits += 1;
                    debug!(key, "cache hit");
                    return Some(v);
                }
                Err(e) => {
                    warn!(key, error = %e, "dropping undecodable cache entry");
                    st.remove(key);
                    st.counters.misses += 1;
                    return None;
                }
            }
        }

        if !config.stale_while_revalidate {
            st.remove(key);
            st.counters.expirations += 1;
            st.counters.misses += 1;
            debug!(key, "cache entry expired");
            return None;
        }

        if entry.stale_served {
            st.counters.misses += 1;
            return None;
        }

        entry.stale_served = true;
        let metadata = entry.metadata.clone();
        let value = match entry.decode() {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "dropping undecodable stale entry");
                st.remove(key);
                st.counters.misses += 1;
                return None;
            }
        };
        st.counters.stale_hits += 1;
        drop(st);

        debug!(key, "serving stale entry");
        self.schedule_revalidation(key.to_string(), metadata);
        Some(value)
    }

    fn schedule_revalidation(&self, key: String, metadata: EntryMetadata) {
        let Some(revalidator) = self.inner.revalidator.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %key, "no runtime available, revalidation skipped");
            return;
        };
        let tx = self.inner.revalidated_tx.clone();
        handle.spawn(async move {
            match revalidator.revalidate(&key, &metadata).await {
                Ok(Some(value)) => {
                    let options = SetOptions::from_metadata(&metadata);
                    let _ = tx.send(Revalidated { key, value, options });
                }
                Ok(None) => debug!(key = %key, "revalidation produced no value"),
                Err(e) => warn!(key = %key, error = %e, "revalidation failed"),
            }
        });
    }

    /// Applies finished background revalidations. Called from `get`, `set` and maintenance.
    pub fn drain_revalidations(&self) -> usize {
        let mut done = Vec::new();
        {
            let mut rx = lock(&self.inner.revalidated_rx);
            while let Ok(r) = rx.try_recv() {
                done.push(r);
            }
        }
        let n = done.len();
        for r in done {
            let outcome = self.store_value(&r.key, r.value, r.options);
            debug!(key = %r.key, stored = outcome.is_stored(), "revalidation applied");
        }
        n
    }

    /// Stores a value, evicting as the configured strategy dictates.
    ///
    /// Values that cannot be serialized, compressed, or fitted are skipped and
    /// logged; the cache never exceeds `max_size_bytes`.
    pub fn set(&self, key: &str, value: V, options: SetOptions) -> SetOutcome {
        self.drain_revalidations();
        self.store_value(key, value, options)
    }

    fn store_value(&self, key: &str, value: V, options: SetOptions) -> SetOutcome {
        let config = self.inner.config.load_full();

        let serialized = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => return self.skip(key, SkipReason::Serialization(e.to_string())),
        };

        let (stored, size, compressed) = if config.compression_enabled
            && serialized.len() > config.compression_threshold_bytes
        {
            match codec::compress(&serialized) {
                Ok(encoded) if encoded.len() < serialized.len() => {
                    let size = encoded.len();
                    (StoredValue::Compressed(encoded), size, true)
                }
                Ok(_) => (StoredValue::Plain(value), serialized.len(), false),
                Err(e) => return self.skip(key, SkipReason::Compression(e.to_string())),
            }
        } else {
            (StoredValue::Plain(value), serialized.len(), false)
        };

        if size > config.max_size_bytes {
            return self.skip(
                key,
                SkipReason::Capacity {
                    required_bytes: size,
                    max_bytes: config.max_size_bytes,
                },
            );
        }

        let now = now_ms();
        let mut st = lock(&self.inner.state);
        let ttl_ms = options
            .ttl
            .map(|t| t.as_millis() as u64)
            .or_else(|| {
                options
                    .endpoint
                    .as_ref()
                    .and_then(|e| st.endpoint_ttls.get(e).copied())
            })
            .unwrap_or(config.ttl_ms);

        st.remove(key);
        self.ensure_capacity(&mut st, size, &config, now);
        if st.total_bytes + size > config.max_size_bytes {
            drop(st);
            return self.skip(
                key,
                SkipReason::Capacity {
                    required_bytes: size,
                    max_bytes: config.max_size_bytes,
                },
            );
        }

        st.entries.put(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: stored,
                created_at_ms: now,
                ttl_ms,
                hit_count: 0,
                last_access_ms: now,
                size_bytes: size,
                compressed,
                metadata: EntryMetadata {
                    endpoint: options.endpoint,
                    priority: options.priority,
                    tags: options.tags,
                },
                stale_served: false,
            },
        );
        st.total_bytes += size;
        st.counters.sets += 1;
        debug!(key, size, compressed, ttl_ms, "cache set");
        SetOutcome::Stored
    }

    fn skip(&self, key: &str, reason: SkipReason) -> SetOutcome {
        let err = match &reason {
            SkipReason::Serialization(m) => Error::Runtime {
                message: format!("serialization failed: {}", m),
                context: crate::ErrorContext::new().with_source("smart_cache"),
            },
            SkipReason::Compression(m) => Error::compression(m.clone()),
            SkipReason::Capacity {
                required_bytes,
                max_bytes,
            } => Error::Capacity {
                required_bytes: *required_bytes,
                max_bytes: *max_bytes,
            },
        };
        warn!(key, error = %err, "cache set skipped");
        lock(&self.inner.state).counters.skipped += 1;
        SetOutcome::Skipped(reason)
    }

    /// Frees room for `required` more bytes.
    fn ensure_capacity(
        &self,
        st: &mut CacheState<V>,
        required: usize,
        config: &CacheConfig,
        now: u64,
    ) {
        if config.eviction_strategy == EvictionStrategy::Ttl {
            let swept = st.sweep(now, config.stale_while_revalidate, config.maintenance_sweep_limit);
            if swept > 0 {
                debug!(swept, "expired entries swept on insert");
            }
        }
        if st.total_bytes + required <= config.max_size_bytes {
            return;
        }

        // Under pressure every expired entry goes before live ones, grace or not.
        if config.eviction_strategy == EvictionStrategy::Ttl {
            let expired: Vec<String> = st
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                st.remove(&key);
                st.counters.expirations += 1;
            }
            if st.total_bytes + required <= config.max_size_bytes {
                return;
            }
        }

        let metrics = match (config.eviction_strategy, &self.inner.analyzer) {
            (EvictionStrategy::Adaptive, Some(a)) => Some(a.metrics_snapshot()),
            _ => None,
        };
        let order = eviction_order(&st.entries, config.eviction_strategy, metrics.as_ref());
        for key in order {
            if st.total_bytes + required <= config.max_size_bytes {
                break;
            }
            if let Some(e) = st.remove(&key) {
                st.counters.evictions += 1;
                debug!(key = %key, size = e.size_bytes, strategy = ?config.eviction_strategy, "evicted");
            }
        }
    }

    /// True when a live (unexpired) entry exists. Does not affect recency.
    pub fn has(&self, key: &str) -> bool {
        let now = now_ms();
        lock(&self.inner.state)
            .entries
            .peek(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    pub fn delete(&self, key: &str) -> bool {
        lock(&self.inner.state).remove(key).is_some()
    }

    /// Drops every entry tagged with the `METHOD:endpoint` key. Returns how many were removed.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let mut st = lock(&self.inner.state);
        let doomed: Vec<String> = st
            .entries
            .iter()
            .filter(|(_, e)| e.metadata.endpoint.as_deref() == Some(endpoint))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            st.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut st = lock(&self.inner.state);
        st.entries.clear();
        st.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        lock(&self.inner.state).total_bytes
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn entry_metadata(&self, key: &str) -> Option<EntryMetadata> {
        lock(&self.inner.state)
            .entries
            .peek(key)
            .map(|e| e.metadata.clone())
    }

    pub fn stats(&self) -> CacheStats {
        let now = now_ms();
        let st = lock(&self.inner.state);
        let c = &st.counters;
        let served = c.hits + c.stale_hits;
        let lookups = served + c.misses;
        let total_entries = st.entries.len();
        let age_sum: u64 = st.entries.iter().map(|(_, e)| e.age_ms(now)).sum();
        CacheStats {
            hits: c.hits,
            misses: c.misses,
            stale_hits: c.stale_hits,
            sets: c.sets,
            skipped: c.skipped,
            evictions: c.evictions,
            expirations: c.expirations,
            total_entries,
            total_size_bytes: st.total_bytes,
            compressed_entries: st.entries.iter().filter(|(_, e)| e.compressed).count(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                served as f64 / lookups as f64
            },
            average_entry_age_ms: if total_entries == 0 {
                0.0
            } else {
                age_sum as f64 / total_entries as f64
            },
        }
    }

    /// Applies a partial config update and evicts down to the new capacity.
    pub fn update_config(&self, update: &CacheConfigUpdate) -> Result<()> {
        let mut next = (*self.inner.config.load_full()).clone();
        next.apply(update);
        next.validate()?;
        let next = Arc::new(next);
        self.inner.config.store(Arc::clone(&next));
        let mut st = lock(&self.inner.state);
        self.ensure_capacity(&mut st, 0, &next, now_ms());
        info!(strategy = ?next.eviction_strategy, max_size_bytes = next.max_size_bytes, "cache config updated");
        Ok(())
    }

    /// TTL used for future stores tagged with `endpoint` that carry no explicit TTL.
    pub fn set_endpoint_ttl(&self, endpoint: impl Into<String>, ttl: Duration) {
        lock(&self.inner.state)
            .endpoint_ttls
            .insert(endpoint.into(), ttl.as_millis() as u64);
    }

    pub fn endpoint_ttl(&self, endpoint: &str) -> Option<Duration> {
        lock(&self.inner.state)
            .endpoint_ttls
            .get(endpoint)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Removes expired entries, examining at most `maintenance_sweep_limit`
    /// entries from the least recently used end.
    ///
    /// Under stale-while-revalidate an expired entry is kept until it has been
    /// served stale or has outlived twice its TTL.
    pub fn sweep_expired(&self) -> usize {
        let config = self.inner.config.load();
        let now = now_ms();
        lock(&self.inner.state).sweep(now, config.stale_while_revalidate, config.maintenance_sweep_limit)
    }

    /// One maintenance pass: apply revalidations, sweep, snapshot.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let revalidated = self.drain_revalidations();
        let expired = self.sweep_expired();
        let persisted = match self.persist().await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "cache snapshot failed");
                false
            }
        };
        let stats = self.stats();
        debug!(
            revalidated,
            expired,
            entries = stats.total_entries,
            bytes = stats.total_size_bytes,
            "cache maintenance"
        );
        MaintenanceReport {
            revalidated,
            expired,
            persisted,
            stats,
        }
    }

    /// Runs `run_maintenance` every `interval` until the handle is aborted.
    pub fn start_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.run_maintenance().await;
            }
        })
    }

    pub fn snapshot(&self) -> CacheSnapshot<V> {
        let st = lock(&self.inner.state);
        let entries: Vec<CacheEntry<V>> = st.entries.iter().rev().map(|(_, e)| e.clone()).collect();
        let access_order = entries.iter().map(|e| e.key.clone()).collect();
        CacheSnapshot {
            entries,
            access_order,
            timestamp: now_ms(),
        }
    }

    /// Writes a snapshot to the configured store. `Ok(false)` when none is configured.
    pub async fn persist(&self) -> Result<bool> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(false);
        };
        let blob = serde_json::to_string(&self.snapshot())?;
        store.save(blob).await?;
        Ok(true)
    }

    /// Loads the stored snapshot, skipping expired entries and discarding a
    /// corrupted blob. Returns how many entries were restored.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(0);
        };
        let Some(blob) = store.load().await? else {
            return Ok(0);
        };
        let snapshot: CacheSnapshot<V> = match serde_json::from_str(&blob) {
            Ok(s) => s,
            Err(e) => {
                warn!(store = store.name(), error = %e, "discarding corrupted cache snapshot");
                if let Err(e) = store.clear().await {
                    warn!(error = %e, "failed to clear corrupted snapshot");
                }
                return Ok(0);
            }
        };

        let config = self.inner.config.load_full();
        let now = now_ms();
        let mut by_key: HashMap<String, CacheEntry<V>> = snapshot
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        let mut ordered: Vec<CacheEntry<V>> = Vec::with_capacity(by_key.len());
        for key in &snapshot.access_order {
            if let Some(e) = by_key.remove(key) {
                ordered.push(e);
            }
        }
        let mut rest: Vec<CacheEntry<V>> = by_key.into_values().collect();
        rest.sort_by_key(|e| e.last_access_ms);
        let mut all = rest;
        all.extend(ordered);

        let mut st = lock(&self.inner.state);
        let mut restored = 0;
        for entry in all {
            if entry.is_expired(now) || entry.size_bytes > config.max_size_bytes {
                continue;
            }
            st.remove(&entry.key);
            self.ensure_capacity(&mut st, entry.size_bytes, &config, now);
            if st.total_bytes + entry.size_bytes > config.max_size_bytes {
                continue;
            }
            st.total_bytes += entry.size_bytes;
            st.entries.put(entry.key.clone(), entry);
            restored += 1;
        }
        info!(restored, store = store.name(), "cache snapshot restored");
        Ok(restored)
    }

    /// Re-reads the analyzer's busiest healthy endpoints as preload candidates.
    pub fn refresh_preload_candidates(&self) -> usize {
        let Some(analyzer) = &self.inner.analyzer else {
            return 0;
        };
        let top_n = self.inner.config.load().preload_top_n;
        let candidates = select_candidates(&analyzer.top_endpoints(top_n, PRELOAD_MIN_SUCCESS_RATE));
        let n = candidates.len();
        lock(&self.inner.state).preload = candidates;
        debug!(candidates = n, "preload candidates refreshed");
        n
    }

    pub fn preload_candidates(&self) -> Vec<PreloadCandidate> {
        lock(&self.inner.state).preload.clone()
    }

    /// Candidates whose peak hour is `hour` or the following hour.
    pub fn due_preloads(&self, hour: usize) -> Vec<PreloadCandidate> {
        lock(&self.inner.state)
            .preload
            .iter()
            .filter(|c| c.is_due(hour))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::RequestRecord;
    use crate::transport::HttpMethod;
    use serde_json::{json, Value};

    fn lru_cache(max: usize) -> SmartCache<String> {
        SmartCache::new(
            CacheConfig::new()
                .with_max_size_bytes(max)
                .with_eviction_strategy(EvictionStrategy::Lru)
                .with_compression(false),
        )
    }

    #[test]
    fn test_set_and_get_plain() {
        let cache = lru_cache(1024);
        assert!(cache.set("a", "hello".into(), SetOptions::new()).is_stored());
        assert_eq!(cache.get("a").as_deref(), Some("hello"));
        assert_eq!(cache.size_bytes(), "\"hello\"".len());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.sets, 1);
    }

    #[test]
    fn test_oversized_value_is_skipped() {
        let cache = lru_cache(16);
        let outcome = cache.set("big", "x".repeat(64), SetOptions::new());
        assert!(matches!(outcome, SetOutcome::Skipped(SkipReason::Capacity { .. })));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().skipped, 1);
    }

    #[test]
    fn test_replacing_key_releases_old_size() {
        let cache = lru_cache(100);
        cache.set("k", "a".repeat(60), SetOptions::new());
        cache.set("k", "b".repeat(60), SetOptions::new());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 62);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_large_values_are_compressed() {
        let cache: SmartCache<Value> = SmartCache::new(CacheConfig::new());
        let body = json!({"items": vec!["repeated payload"; 200]});
        let raw = serde_json::to_vec(&body).unwrap().len();
        cache.set("big", body.clone(), SetOptions::new());
        assert!(cache.size_bytes() < raw);
        assert_eq!(cache.stats().compressed_entries, 1);
        assert_eq!(cache.get("big"), Some(body));
    }

    #[test]
    fn test_lfu_evicts_least_hit() {
        let cache: SmartCache<String> = SmartCache::new(
            CacheConfig::new()
                .with_max_size_bytes(30)
                .with_eviction_strategy(EvictionStrategy::Lfu)
                .with_compression(false),
        );
        cache.set("a", "aaaaaaaa".into(), SetOptions::new());
        cache.set("b", "bbbbbbbb".into(), SetOptions::new());
        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.set("c", "cccccccc".into(), SetOptions::new());
        cache.set("d", "dddddddd".into(), SetOptions::new());
        assert!(cache.has("a"));
        assert!(cache.has("b"));
        assert!(!cache.has("c"));
        assert!(cache.has("d"));
    }

    #[test]
    fn test_adaptive_keeps_expensive_endpoint() {
        let analyzer = Arc::new(PerformanceAnalyzer::new());
        for _ in 0..100 {
            analyzer.record(RequestRecord::new(HttpMethod::Get, "/slow").with_duration_ms(900.0));
        }
        analyzer.record(RequestRecord::new(HttpMethod::Get, "/fast").with_duration_ms(5.0));
        let cache: SmartCache<String> = SmartCache::builder(
            CacheConfig::new()
                .with_max_size_bytes(25)
                .with_compression(false),
        )
        .analyzer(analyzer)
        .build();

        cache.set("slow", "s".repeat(10), SetOptions::new().with_endpoint("GET:/slow"));
        cache.set("fast", "f".repeat(10), SetOptions::new().with_endpoint("GET:/fast"));
        cache.get("fast");
        cache.set("new", "n".repeat(10), SetOptions::new());
        assert!(cache.has("slow"));
        assert!(!cache.has("fast"));
    }

    #[test]
    fn test_shrinking_capacity_evicts() {
        let cache = lru_cache(100);
        cache.set("a", "a".repeat(30), SetOptions::new());
        cache.set("b", "b".repeat(30), SetOptions::new());
        cache
            .update_config(&CacheConfigUpdate {
                max_size_bytes: Some(40),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cache.keys(), vec!["b".to_string()]);
        assert!(cache.size_bytes() <= 40);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let cache = lru_cache(100);
        let err = cache
            .update_config(&CacheConfigUpdate {
                ttl_ms: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(cache.config().max_size_bytes, 100);
    }

    #[test]
    fn test_endpoint_ttl_applies_without_explicit_ttl() {
        let cache = lru_cache(1024);
        cache.set_endpoint_ttl("GET:/feed", Duration::from_secs(600));
        cache.set("k", "v".into(), SetOptions::new().with_endpoint("GET:/feed"));
        let snap = cache.snapshot();
        assert_eq!(snap.entries[0].ttl_ms, 600_000);
    }

    #[test]
    fn test_has_does_not_promote() {
        let cache = lru_cache(1024);
        cache.set("a", "1".into(), SetOptions::new());
        cache.set("b", "2".into(), SetOptions::new());
        assert!(cache.has("a"));
        assert_eq!(cache.keys(), vec!["b".to_string(), "a".to_string()]);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
    }

    #[test]
    fn test_preload_candidates_follow_analyzer() {
        let analyzer = Arc::new(PerformanceAnalyzer::new());
        let peak = 3_600_000 * 14;
        for i in 0..20 {
            analyzer.record(RequestRecord::new(HttpMethod::Get, "/catalog").with_timestamp_ms(peak + i));
        }
        analyzer.record(RequestRecord::new(HttpMethod::Post, "/orders").with_timestamp_ms(peak));
        let cache: SmartCache<Value> = SmartCache::builder(CacheConfig::new())
            .analyzer(analyzer)
            .build();
        assert_eq!(cache.refresh_preload_candidates(), 1);
        assert_eq!(cache.due_preloads(13).len(), 1);
        assert_eq!(cache.due_preloads(14)[0].key, "GET:/catalog");
        assert!(cache.due_preloads(15).is_empty());
    }
}
