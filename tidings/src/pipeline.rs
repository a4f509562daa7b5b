//! Extension pipeline.
//!
//! Extensions observe every publish and every handler invocation. They are
//! invoked in registration order, only at the hook points they declare in
//! [`Extension::hooks`]. A failing hook never stops delivery: its error (or
//! panic) becomes a fault that is offered to every extension's fault hook,
//! once, and is logged if nobody handles it.

use crate::broker::{Broker, WeakBroker};
use parking_lot::RwLock;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tidings_core::{
    ExtensionFault, Fault, FaultCause, FaultHandling, FiredMessage, HookError, HookPoint, HookSet,
    SubscriptionInfo,
};
use tracing::error;

/// A cross-cutting observer of the publish/dispatch cycle.
///
/// Every hook has a no-op default; an extension overrides the ones it needs
/// and lists them in [`Extension::hooks`].
///
/// # Example
///
/// ```rust
/// use tidings::{Extension, HookError, HookSet, PublishContext};
///
/// struct Audit;
///
/// impl Extension for Audit {
///     fn name(&self) -> &str {
///         "audit"
///     }
///
///     fn hooks(&self) -> HookSet {
///         HookSet::BEFORE_PUBLISH
///     }
///
///     fn before_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
///         println!("publishing {}", ctx.message().topic());
///         Ok(())
///     }
/// }
/// ```
pub trait Extension: Send + Sync + 'static {
    /// Name used in logs and fault reports.
    fn name(&self) -> &str;

    /// The hooks this extension implements.
    fn hooks(&self) -> HookSet;

    /// Called once when the extension is added to `broker`.
    fn attached(&self, _broker: &WeakBroker) {}

    /// Before subscriptions are looked up. Cannot veto the publish.
    fn before_publish(&self, _ctx: &PublishContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// After every subscription has been dispatched or scheduled.
    fn after_publish(&self, _ctx: &PublishContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Before a handler runs, on the thread that runs it.
    fn before_handle(&self, _ctx: &HandleContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// After a handler ran; [`HandleContext::outcome`] tells how it went.
    fn after_handle(&self, _ctx: &HandleContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// A handler or extension failed.
    fn on_fault(&self, _fault: &Fault<'_>) -> FaultHandling {
        FaultHandling::Unhandled
    }
}

/// What publish hooks see.
pub struct PublishContext<'a> {
    broker: &'a Broker,
    message: &'a FiredMessage,
}

impl<'a> PublishContext<'a> {
    /// The publishing broker.
    pub fn broker(&self) -> &'a Broker {
        self.broker
    }

    /// The message being published.
    pub fn message(&self) -> &'a FiredMessage {
        self.message
    }
}

/// How a handler invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The handler returned `Ok`.
    Completed,
    /// The handler returned an error or panicked.
    Faulted,
}

/// What handle hooks see.
pub struct HandleContext<'a> {
    broker: &'a Broker,
    message: &'a FiredMessage,
    subscription: &'a SubscriptionInfo,
    outcome: Option<HandleOutcome>,
}

impl<'a> HandleContext<'a> {
    /// The dispatching broker.
    pub fn broker(&self) -> &'a Broker {
        self.broker
    }

    /// The message being handled.
    pub fn message(&self) -> &'a FiredMessage {
        self.message
    }

    /// The subscription whose handler runs.
    pub fn subscription(&self) -> &'a SubscriptionInfo {
        self.subscription
    }

    /// `None` before the handler runs.
    pub fn outcome(&self) -> Option<HandleOutcome> {
        self.outcome
    }
}

/// An immutable snapshot of the extension list.
#[derive(Clone)]
pub(crate) struct ExtensionSet(Arc<[Arc<dyn Extension>]>);

impl ExtensionSet {
    fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn before_publish(&self, broker: &Broker, message: &FiredMessage) {
        let ctx = PublishContext { broker, message };
        self.invoke(broker, message, HookPoint::BeforePublish, |e| {
            e.before_publish(&ctx)
        });
    }

    pub(crate) fn after_publish(&self, broker: &Broker, message: &FiredMessage) {
        let ctx = PublishContext { broker, message };
        self.invoke(broker, message, HookPoint::AfterPublish, |e| {
            e.after_publish(&ctx)
        });
    }

    pub(crate) fn before_handle(
        &self,
        broker: &Broker,
        message: &FiredMessage,
        subscription: &SubscriptionInfo,
    ) {
        let ctx = HandleContext {
            broker,
            message,
            subscription,
            outcome: None,
        };
        self.invoke(broker, message, HookPoint::BeforeHandle, |e| {
            e.before_handle(&ctx)
        });
    }

    pub(crate) fn after_handle(
        &self,
        broker: &Broker,
        message: &FiredMessage,
        subscription: &SubscriptionInfo,
        outcome: HandleOutcome,
    ) {
        let ctx = HandleContext {
            broker,
            message,
            subscription,
            outcome: Some(outcome),
        };
        self.invoke(broker, message, HookPoint::AfterHandle, |e| {
            e.after_handle(&ctx)
        });
    }

    /// Offer `fault` to every fault hook, exactly once each.
    ///
    /// Handled if at least one extension says so. Panics raised by a fault
    /// hook are logged and not routed again.
    pub(crate) fn route(&self, fault: Fault<'_>) -> FaultHandling {
        let mut handling = FaultHandling::Unhandled;
        for extension in self.with_hook(HookPoint::Fault) {
            match panic::catch_unwind(AssertUnwindSafe(|| extension.on_fault(&fault))) {
                Ok(FaultHandling::Handled) => handling = FaultHandling::Handled,
                Ok(FaultHandling::Unhandled) => {}
                Err(panic) => error!(
                    extension = extension.name(),
                    cause = %FaultCause::from_panic(panic),
                    %fault,
                    "fault hook panicked"
                ),
            }
        }
        handling
    }

    fn with_hook(&self, point: HookPoint) -> impl Iterator<Item = &Arc<dyn Extension>> + '_ {
        self.0
            .iter()
            .filter(move |extension| extension.hooks().contains(point.flag()))
    }

    fn invoke<F>(&self, broker: &Broker, message: &FiredMessage, point: HookPoint, hook: F)
    where
        F: Fn(&dyn Extension) -> Result<(), HookError>,
    {
        for extension in self.with_hook(point) {
            let cause = match panic::catch_unwind(AssertUnwindSafe(|| hook(extension.as_ref()))) {
                Ok(Ok(())) => continue,
                Ok(Err(HookError::Mapping(fault))) => {
                    self.report(broker, Fault::Mapping(&fault));
                    continue;
                }
                Ok(Err(HookError::Failed(error))) => FaultCause::Error(error),
                Err(panic) => FaultCause::from_panic(panic),
            };
            let fault = ExtensionFault {
                extension: extension.name().to_string(),
                hook: point,
                topic: message.topic_name().clone(),
                cause,
            };
            self.report(broker, Fault::Extension(&fault));
        }
    }

    fn report(&self, broker: &Broker, fault: Fault<'_>) {
        if self.route(fault) == FaultHandling::Unhandled {
            broker.record_unhandled(fault);
        }
    }
}

/// The broker's extension list. Copy-on-write: publishes work against the
/// snapshot they started with.
pub(crate) struct Pipeline {
    extensions: RwLock<ExtensionSet>,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            extensions: RwLock::new(ExtensionSet::empty()),
        }
    }

    pub(crate) fn snapshot(&self) -> ExtensionSet {
        self.extensions.read().clone()
    }

    pub(crate) fn push(&self, extension: Arc<dyn Extension>) {
        let mut extensions = self.extensions.write();
        let mut next = extensions.0.to_vec();
        next.push(extension);
        *extensions = ExtensionSet(next.into());
    }
}
