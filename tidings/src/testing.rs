//! Testing utilities for tidings.
//!
//! Detached dispatch is fire-and-forget, so tests need explicit join points
//! and a way to see what the pipeline did.
//!
//! - [`CountdownLatch`]: blocks until a number of signals arrived
//! - [`RecordingExtension`]: an extension that records every hook call

use crate::pipeline::{Extension, HandleContext, HandleOutcome, PublishContext};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tidings_core::{EndpointId, Fault, FaultHandling, HookError, HookSet};

// ============================================================================
// Countdown Latch
// ============================================================================

/// A latch released after a fixed number of [`signal`](Self::signal) calls.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tidings::testing::CountdownLatch;
///
/// let latch = CountdownLatch::new(2);
/// let worker = latch.clone();
/// std::thread::spawn(move || {
///     worker.signal();
///     worker.signal();
/// });
/// assert!(latch.wait_timeout(Duration::from_secs(5)));
/// ```
#[derive(Clone)]
pub struct CountdownLatch {
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl CountdownLatch {
    /// A latch waiting for `count` signals.
    pub fn new(count: usize) -> Self {
        Self {
            state: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    /// Record one signal. Extra signals after release are ignored.
    pub fn signal(&self) {
        let (remaining, released) = &*self.state;
        let mut remaining = remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            released.notify_all();
        }
    }

    /// Signals still missing.
    pub fn count(&self) -> usize {
        *self.state.0.lock()
    }

    /// Wait for the latch to be released. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (remaining, released) = &*self.state;
        let mut remaining = remaining.lock();
        while *remaining > 0 {
            if released.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

// ============================================================================
// Recording Extension
// ============================================================================

/// One hook invocation seen by a [`RecordingExtension`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    /// `before_publish` on a topic.
    BeforePublish(String),
    /// `after_publish` on a topic.
    AfterPublish(String),
    /// `before_handle` for a subscription.
    BeforeHandle(String, EndpointId),
    /// `after_handle` for a subscription.
    AfterHandle(String, EndpointId, HandleOutcome),
    /// `on_fault`, with the fault's topic and rendered message.
    Fault(String, String),
}

/// An extension that records every hook it sees.
///
/// Clones share the same record, so a test can keep one and hand the other
/// to a broker.
#[derive(Clone)]
pub struct RecordingExtension {
    name: String,
    calls: Arc<Mutex<Vec<HookCall>>>,
    fault_handling: FaultHandling,
}

impl RecordingExtension {
    /// A recorder that leaves faults unhandled.
    pub fn new() -> Self {
        Self {
            name: "recording".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fault_handling: FaultHandling::Unhandled,
        }
    }

    /// A recorder that claims every fault it sees.
    pub fn handling_faults() -> Self {
        Self {
            fault_handling: FaultHandling::Handled,
            ..Self::new()
        }
    }

    /// Rename the recorder.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls.
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Rendered messages of the recorded faults.
    pub fn faults(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                HookCall::Fault(_, message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget every recorded call.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: HookCall) {
        self.calls.lock().push(call);
    }
}

impl Default for RecordingExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for RecordingExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        HookSet::all()
    }

    fn before_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        self.record(HookCall::BeforePublish(ctx.message().topic().to_string()));
        Ok(())
    }

    fn after_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        self.record(HookCall::AfterPublish(ctx.message().topic().to_string()));
        Ok(())
    }

    fn before_handle(&self, ctx: &HandleContext<'_>) -> Result<(), HookError> {
        self.record(HookCall::BeforeHandle(
            ctx.message().topic().to_string(),
            ctx.subscription().id,
        ));
        Ok(())
    }

    fn after_handle(&self, ctx: &HandleContext<'_>) -> Result<(), HookError> {
        self.record(HookCall::AfterHandle(
            ctx.message().topic().to_string(),
            ctx.subscription().id,
            ctx.outcome().unwrap_or(HandleOutcome::Completed),
        ));
        Ok(())
    }

    fn on_fault(&self, fault: &Fault<'_>) -> FaultHandling {
        self.record(HookCall::Fault(fault.topic().to_string(), fault.to_string()));
        self.fault_handling
    }
}
