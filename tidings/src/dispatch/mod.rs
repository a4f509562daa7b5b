//! Scheduling of handler invocations.
//!
//! - Synchronous subscriptions run inline on the publisher's thread.
//! - Asynchronous subscriptions are queued on the shared [`pool::WorkerPool`].
//! - Background subscriptions are queued on a [`background::BackgroundWorker`]
//!   owned by the subscription.
//!
//! Every queued job holds an [`in_flight::InFlightGuard`] so that
//! `Broker::wait_idle` can tell when detached work has drained.

pub(crate) mod background;
pub(crate) mod in_flight;
pub(crate) mod pool;

use crate::registry::SubscriptionEndpoint;
use std::panic::{self, AssertUnwindSafe};
use tidings_core::{FaultCause, FiredMessage};

/// A unit of detached work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of running one handler.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// The handler ran to completion.
    Handled,
    /// The subscriber was dropped before the handler could run.
    OwnerGone,
}

/// Run `subscription`'s handler, turning errors and panics into a [`FaultCause`].
pub(crate) fn run_handler(
    subscription: &SubscriptionEndpoint,
    message: &FiredMessage,
) -> Result<Delivery, FaultCause> {
    match panic::catch_unwind(AssertUnwindSafe(|| subscription.invoke(message))) {
        Ok(Some(Ok(()))) => Ok(Delivery::Handled),
        Ok(Some(Err(error))) => Err(FaultCause::Error(error)),
        Ok(None) => Ok(Delivery::OwnerGone),
        Err(panic) => Err(FaultCause::from_panic(panic)),
    }
}
