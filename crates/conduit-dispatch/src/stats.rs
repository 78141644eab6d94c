//! Dispatcher statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Actions accepted into the queue
    pub submitted: u64,
    /// Actions that ran to completion
    pub executed: u64,
    /// Actions that failed and terminated the worker (0 or 1)
    pub failed: u64,
    /// Actions discarded by purges
    pub purged: u64,
    /// Actions dropped when the worker terminated on a fault
    pub discarded: u64,
    /// Submissions refused because the dispatcher was not running
    pub rejected: u64,
    /// Number of purge calls, including ones that found the queue empty
    pub purges: u64,
}

impl DispatcherStats {
    /// Accepted actions that have neither run nor been dropped yet
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.executed + self.failed + self.purged + self.discarded)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub submitted: AtomicU64,
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub purged: AtomicU64,
    pub discarded: AtomicU64,
    pub rejected: AtomicU64,
    pub purges: AtomicU64,
}

impl StatsCounters {
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }
}
