//! Request batching and deduplication.
//!
//! # Batch Processor
//!
//! Individual requests are grouped into pending batches keyed by a
//! [`GroupingStrategy`]. A batch flushes when it reaches `max_batch_size`
//! or when its wait timer fires. On flush:
//!
//! - GETs on allow-listed endpoints are merged into one combined call, with a
//!   per-request fallback if that call fails
//! - other GETs run in parallel
//! - POST, PUT and DELETE run sequentially within the batch
//!
//! Equivalent concurrent requests (same method, url and data) are
//! deduplicated: later callers attach to the pending request and share its
//! outcome.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchProcessor`] | Enqueue, flush, statistics, runtime reconfiguration |
//! | [`BatchConfig`] | Size and time thresholds, grouping, dedup, combinable endpoints |
//! | [`EndpointThreshold`] | Per-endpoint size/time overrides |
//! | [`BatchStats`] | Batch counts, averages and estimated time savings |
//!
//! ## Example
//!
//! ```rust,no_run
//! use api_traffic_optimizer::batch::{BatchConfig, BatchProcessor, EnqueueOptions};
//! use api_traffic_optimizer::transport::{HttpMethod, HttpTransport};
//! use std::sync::Arc;
//!
//! # async fn run() -> api_traffic_optimizer::Result<()> {
//! let transport = Arc::new(HttpTransport::with_base_url("https://api.example.com")?);
//! let processor = BatchProcessor::new(
//!     transport,
//!     BatchConfig::new().with_combinable_endpoint("/api/content"),
//! );
//! let response = processor
//!     .enqueue(HttpMethod::Get, "/api/content?id=1", None, EnqueueOptions::new())
//!     .await?;
//! println!("{}", response.data);
//! # Ok(())
//! # }
//! ```

mod combine;
mod config;
mod grouping;
mod processor;
mod request;
mod stats;

pub use combine::{is_combinable, merge_params};
pub use config::{BatchConfig, BatchConfigUpdate, EndpointThreshold, GroupingStrategy};
pub use grouping::{batch_key, EndpointType};
pub use processor::{BatchProcessor, PendingBatchInfo};
pub use request::{BatchableRequest, EnqueueOptions};
pub use stats::BatchStats;
