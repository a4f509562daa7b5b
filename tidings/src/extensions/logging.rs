//! Logging extension for broker observation.

use crate::pipeline::{Extension, HandleContext, PublishContext};
use tidings_core::{Fault, FaultHandling, HookError, HookSet};
use tracing::{debug, warn};

/// An extension that traces every hook point.
///
/// Faults are logged at `warn` and left unhandled, so they still reach the
/// publisher or the broker's unhandled-fault log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExtension;

impl Extension for LoggingExtension {
    fn name(&self) -> &str {
        "logging"
    }

    fn hooks(&self) -> HookSet {
        HookSet::all()
    }

    fn before_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        let message = ctx.message();
        debug!(
            topic = message.topic(),
            sender = %message.sender(),
            restriction = %message.restriction(),
            payload = %message.payload().payload_type(),
            "publishing"
        );
        Ok(())
    }

    fn after_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        debug!(topic = ctx.message().topic(), "published");
        Ok(())
    }

    fn before_handle(&self, ctx: &HandleContext<'_>) -> Result<(), HookError> {
        let subscription = ctx.subscription();
        debug!(
            topic = ctx.message().topic(),
            subscription = %subscription.id,
            policy = %subscription.policy,
            "handling"
        );
        Ok(())
    }

    fn after_handle(&self, ctx: &HandleContext<'_>) -> Result<(), HookError> {
        debug!(
            topic = ctx.message().topic(),
            subscription = %ctx.subscription().id,
            outcome = ?ctx.outcome(),
            "handled"
        );
        Ok(())
    }

    fn on_fault(&self, fault: &Fault<'_>) -> FaultHandling {
        warn!(topic = fault.topic(), %fault, "fault");
        FaultHandling::Unhandled
    }
}
