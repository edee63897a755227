//! Connector counters
//!
//! Plain atomics shared across the worker and coordinator; scraped by the
//! embedding runtime however it likes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one sink task
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    /// Records accepted by `save`
    pub records_saved: AtomicU64,
    /// Records dropped by dynamic routing because the table does not exist
    pub records_skipped: AtomicU64,
    /// Commit requests observed by the worker
    pub commit_requests: AtomicU64,
    /// Rounds opened by the coordinator
    pub rounds_started: AtomicU64,
    /// Rounds committed end to end
    pub rounds_committed: AtomicU64,
    /// Rounds abandoned on timeout
    pub rounds_timed_out: AtomicU64,
    /// Data + delete files committed to the catalog
    pub files_committed: AtomicU64,
}

pub type SharedMetrics = Arc<ConnectorMetrics>;

impl ConnectorMetrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ConnectorMetrics::shared();
        ConnectorMetrics::incr(&metrics.records_saved);
        ConnectorMetrics::add(&metrics.records_saved, 2);
        assert_eq!(ConnectorMetrics::get(&metrics.records_saved), 3);
        assert_eq!(ConnectorMetrics::get(&metrics.records_skipped), 0);
    }
}
