//! Minimal prelude for application code.
//!
//! Goal: reduce import noise without hiding important concepts.

pub use crate::analyzer::{PerformanceAnalyzer, PerformanceReport, RequestRecord};
pub use crate::batch::{BatchConfig, BatchProcessor, EnqueueOptions, GroupingStrategy};
pub use crate::cache::{CacheConfig, EvictionStrategy, SetOptions, SmartCache};
pub use crate::config::OptimizerConfig;
pub use crate::context::{OptimizerContext, RequestOptions};
pub use crate::transport::{HttpMethod, HttpTransport, Transport, TransportError};
pub use crate::types::Priority;
pub use crate::{Error, Result};
