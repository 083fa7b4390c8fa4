//! Adaptive response caching.
//!
//! # Smart Cache
//!
//! A size-bounded, TTL-aware store for responses. Admission is capacity
//! checked: every `set` either fits (after eviction) or is skipped, so the
//! total cached bytes never exceed `max_size_bytes`.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SmartCache`] | The cache handle; cheap to clone, shared state |
//! | [`CacheConfig`] | TTL, capacity, eviction strategy, compression, stale-while-revalidate |
//! | [`EvictionStrategy`] | `lru`, `lfu`, `ttl` sweep, or `adaptive` scoring |
//! | [`Revalidator`] | Background refresh hook for stale entries |
//! | [`SnapshotStore`] | Durable slot for best-effort snapshots |
//! | [`CacheKeyGenerator`] | SHA-256 keys from method, url and request data |
//!
//! ## Example
//!
//! ```rust
//! use api_traffic_optimizer::cache::{CacheConfig, EvictionStrategy, SetOptions, SmartCache};
//!
//! let cache: SmartCache<String> = SmartCache::new(
//!     CacheConfig::new()
//!         .with_max_size_bytes(1024)
//!         .with_eviction_strategy(EvictionStrategy::Lru),
//! );
//! cache.set("greeting", "hello".to_string(), SetOptions::new());
//! assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
//! ```
//!
//! ## Adaptive eviction
//!
//! With an analyzer attached, each entry tagged with an endpoint is scored by
//! its own hits plus that endpoint's volume, latency and success rate, minus a
//! small size penalty. Entries that are cheap to refetch go first.

mod codec;
mod config;
mod entry;
mod eviction;
mod key;
mod persistence;
mod preload;
mod smart;

pub use config::{CacheConfig, CacheConfigUpdate, EvictionStrategy};
pub use entry::{CacheEntry, EntryMetadata, StoredValue};
pub use eviction::{adaptive_score, eviction_order, RESPONSE_TIME_CEILING_MS};
pub use key::{CacheKey, CacheKeyGenerator};
pub use persistence::{CacheSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use preload::PreloadCandidate;
pub use smart::{
    CacheStats, CacheValue, MaintenanceReport, Revalidator, SetOptions, SetOutcome, SkipReason,
    SmartCache, SmartCacheBuilder,
};
