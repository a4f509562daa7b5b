//! Broker counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of a broker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages accepted by `publish_message`. Rejected ones are not counted.
    pub published: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Handler invocations that returned an error, panicked, or could not
    /// be scheduled.
    pub handler_faults: u64,
    /// Faults no extension handled and that could not be returned to a
    /// caller.
    pub unhandled_faults: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_faults: AtomicU64,
    unhandled_faults: AtomicU64,
}

impl Stats {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unhandled(&self) {
        self.unhandled_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            unhandled_faults: self.unhandled_faults.load(Ordering::Relaxed),
        }
    }
}
