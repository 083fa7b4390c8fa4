//! # api-traffic-optimizer
//!
//! Client-side API traffic optimization: request batching and deduplication,
//! an adaptive response cache, and a usage analyzer whose suggestions feed
//! back into both.
//!
//! ## Overview
//!
//! Requests flow caller → [`batch::BatchProcessor`] → [`transport::Transport`];
//! responses land in the [`cache::SmartCache`] (GETs) and every completed call
//! is recorded by the [`analyzer::PerformanceAnalyzer`]. Periodically the
//! analyzer's suggestions retune per-endpoint batch thresholds and cache TTLs.
//! [`context::OptimizerContext`] wires the three together with an explicit
//! `init` / `shutdown` lifecycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_traffic_optimizer::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> api_traffic_optimizer::Result<()> {
//!     let ctx = OptimizerContext::builder()
//!         .config(OptimizerConfig::from_yaml_str("batch:\n  combinable_endpoints: [/api/content]\n")?)
//!         .transport(Arc::new(HttpTransport::with_base_url("https://api.example.com")?))
//!         .build()?;
//!     ctx.init().await;
//!
//!     let item = ctx.get("/api/content?id=7", None).await?;
//!     println!("{item}");
//!
//!     println!("{}", ctx.export_metrics());
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`analyzer`] | Request records, per-endpoint metrics, usage patterns, suggestions, reports |
//! | [`cache`] | Size-bounded response cache with LRU/LFU/TTL/adaptive eviction |
//! | [`batch`] | Grouping, deduplication, flush triggers, combined GETs |
//! | [`transport`] | Abstract HTTP client and the `reqwest` implementation |
//! | [`config`] | YAML/env configuration for the whole layer |
//! | [`context`] | Explicit wiring, lifecycle and the feedback loop |
//! | [`telemetry`] | `tracing` setup and report sinks |

pub mod analyzer;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod prelude;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod utils;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};

pub use analyzer::{PerformanceAnalyzer, PerformanceReport, RequestRecord};
pub use batch::{BatchConfig, BatchProcessor};
pub use cache::{CacheConfig, SmartCache};
pub use config::OptimizerConfig;
pub use context::{OptimizerContext, OptimizerContextBuilder, RequestOptions, TuningSummary};
pub use transport::{HttpMethod, Transport, TransportError, TransportResponse};
pub use types::Priority;
