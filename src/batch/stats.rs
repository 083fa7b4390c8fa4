//! Batch statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_batches: u64,
    /// Logical requests flushed; deduplicated callers are not counted twice.
    pub total_requests: u64,
    pub average_batch_size: f64,
    /// Mean time a request spent pending before its batch flushed.
    pub average_wait_time_ms: f64,
    /// Estimated, never negative per batch.
    pub time_savings_ms: f64,
    pub deduplicated_requests: u64,
    /// Combined GET calls that succeeded.
    pub combined_calls: u64,
    /// Network calls actually issued.
    pub network_calls: u64,
}

impl BatchStats {
    pub(crate) fn record_batch(
        &mut self,
        size: usize,
        total_wait: Duration,
        duration: Duration,
        assumed_cost_ms: f64,
    ) {
        if size == 0 {
            return;
        }
        let prev_requests = self.total_requests as f64;
        self.total_batches += 1;
        self.total_requests += size as u64;
        self.average_batch_size = self.total_requests as f64 / self.total_batches as f64;

        let wait_ms = total_wait.as_secs_f64() * 1000.0;
        self.average_wait_time_ms =
            (self.average_wait_time_ms * prev_requests + wait_ms) / self.total_requests as f64;

        let saved = size as f64 * assumed_cost_ms - duration.as_secs_f64() * 1000.0;
        self.time_savings_ms += saved.max(0.0);
    }
}
