//! Eviction ordering.
//!
//! Each strategy yields candidate keys in the order they should be evicted;
//! the cache removes from the front until enough space is free.

use super::config::EvictionStrategy;
use super::entry::CacheEntry;
use crate::analyzer::EndpointMetrics;
use lru::LruCache;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Latency above which refetching is considered maximally expensive.
pub const RESPONSE_TIME_CEILING_MS: f64 = 1000.0;

/// Retention score for the adaptive strategy; lower is evicted first.
///
/// `hit_count + 0.1·requests − 0.05·(ceiling − latency) + 0.1·success − 0.00001·size`
/// when the entry's endpoint has metrics, else `hit_count` alone.
pub fn adaptive_score<V>(entry: &CacheEntry<V>, metrics: Option<&EndpointMetrics>) -> f64 {
    let mut score = entry.hit_count as f64;
    if let Some(m) = metrics {
        let latency_complement =
            RESPONSE_TIME_CEILING_MS - m.average_response_time_ms.clamp(0.0, RESPONSE_TIME_CEILING_MS);
        score += 0.1 * m.total_requests as f64;
        score -= 0.05 * latency_complement;
        score += 0.1 * m.success_rate;
        score -= 0.00001 * entry.size_bytes as f64;
    }
    score
}

fn tie_break<V>(a: &CacheEntry<V>, b: &CacheEntry<V>) -> Ordering {
    a.metadata
        .priority
        .weight()
        .cmp(&b.metadata.priority.weight())
        .then(a.last_access_ms.cmp(&b.last_access_ms))
}

/// Keys in eviction order for size-pressure strategies.
///
/// `Ttl` sweeps are handled by the cache itself; when a sweep does not free
/// enough room it falls back to least-recently-used order, which this returns.
pub fn eviction_order<V>(
    entries: &LruCache<String, CacheEntry<V>>,
    strategy: EvictionStrategy,
    metrics: Option<&HashMap<String, EndpointMetrics>>,
) -> Vec<String> {
    match strategy {
        EvictionStrategy::Lru | EvictionStrategy::Ttl => {
            entries.iter().rev().map(|(k, _)| k.clone()).collect()
        }
        EvictionStrategy::Lfu => {
            let mut all: Vec<&CacheEntry<V>> = entries.iter().map(|(_, e)| e).collect();
            all.sort_by(|a, b| a.hit_count.cmp(&b.hit_count).then_with(|| tie_break(a, b)));
            all.into_iter().map(|e| e.key.clone()).collect()
        }
        EvictionStrategy::Adaptive => {
            let mut scored: Vec<(f64, &CacheEntry<V>)> = entries
                .iter()
                .map(|(_, e)| {
                    let m = metrics.and_then(|all| {
                        e.metadata.endpoint.as_ref().and_then(|key| all.get(key))
                    });
                    (adaptive_score(e, m), e)
                })
                .collect();
            scored.sort_by(|(sa, a), (sb, b)| sa.total_cmp(sb).then_with(|| tie_break(a, b)));
            scored.into_iter().map(|(_, e)| e.key.clone()).collect()
        }
    }
}
