//! Small shared helpers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hour of day (UTC, 0..24) for a millisecond timestamp.
pub fn hour_of_day(timestamp_ms: u64) -> usize {
    ((timestamp_ms / 3_600_000) % 24) as usize
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts running operations and lets a caller wait until none remain.
#[derive(Clone)]
pub(crate) struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

/// Held for the duration of one operation; released on drop, including abort.
pub(crate) struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self {
            count: Arc::new(watch::channel(0).0),
        }
    }

    pub(crate) fn enter(&self) -> InFlightGuard {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub(crate) fn current(&self) -> usize {
        *self.count.borrow()
    }

    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        while *rx.borrow_and_update() > 0 {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_of_day() {
        assert_eq!(hour_of_day(0), 0);
        assert_eq!(hour_of_day(3_600_000 * 5 + 10), 5);
        assert_eq!(hour_of_day(3_600_000 * 24), 0);
        assert_eq!(hour_of_day(3_600_000 * 47), 23);
    }

    #[test]
    fn test_now_ms_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_waits_for_every_guard() {
        let tracker = InFlight::new();
        tracker.wait_idle().await;

        let a = tracker.enter();
        let b = tracker.enter();
        assert_eq!(tracker.current(), 2);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            drop(a);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            drop(b);
        });

        let started = tokio::time::Instant::now();
        tracker.wait_idle().await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
        assert_eq!(tracker.current(), 0);
    }
}
