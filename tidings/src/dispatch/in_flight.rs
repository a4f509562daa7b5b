//! Tracking of queued-but-unfinished dispatches.

use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Counter of detached dispatches that have been scheduled but not finished.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    /// Count one more pending dispatch until the returned guard is dropped.
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.pending.lock() += 1;
        InFlightGuard(self.clone())
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until nothing is pending or `timeout` elapses. Returns whether
    /// the counter reached zero.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }

    fn leave(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Releases its slot on drop, including when the job panicked or was discarded.
#[derive(Debug)]
pub(crate) struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}
