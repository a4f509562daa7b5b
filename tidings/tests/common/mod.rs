#![allow(dead_code)]

use std::{sync::Arc, time::Duration};
use tidings::{
    BoxError, Declarations, DispatchPolicy, Endpoints, Extension, Fault, FaultHandling,
    FiredMessage, HandleContext, HandlerRestriction, HookError, HookPoint, HookSet, Message,
    PublishContext,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Payload Types
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct OrderPlaced {
    pub id: u64,
}

impl Message for OrderPlaced {}

#[derive(Clone, Debug, PartialEq)]
pub struct Invoice {
    pub order: u64,
}

impl Message for Invoice {}

// ============================================================================
// Test Endpoints
// ============================================================================

type Callback = Box<dyn Fn(&FiredMessage) -> Result<(), BoxError> + Send + Sync>;

/// Handles one topic with one policy by running a callback.
pub struct Subscriber {
    pub topic: String,
    pub policy: DispatchPolicy,
    callback: Callback,
}

impl Subscriber {
    pub fn new<F>(topic: &str, policy: DispatchPolicy, callback: F) -> Arc<Self>
    where
        F: Fn(&FiredMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            topic: topic.to_string(),
            policy,
            callback: Box::new(callback),
        })
    }
}

impl Endpoints for Subscriber {
    fn declare(&self, endpoints: &mut Declarations<Self>) {
        endpoints.subscription(self.topic.as_str(), self.policy, |this, message| {
            (this.callback)(message)
        });
    }
}

/// Declares a single publication.
pub struct Publisher {
    pub topic: String,
    pub restriction: HandlerRestriction,
}

impl Publisher {
    pub fn new(topic: &str, restriction: HandlerRestriction) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            restriction,
        })
    }
}

impl Endpoints for Publisher {
    fn declare(&self, endpoints: &mut Declarations<Self>) {
        endpoints.publication(self.topic.as_str(), self.restriction);
    }
}

// ============================================================================
// Test Extensions
// ============================================================================

/// Fails at one hook point, by error or by panic.
pub struct FailingExtension {
    pub point: HookPoint,
    pub panics: bool,
}

impl FailingExtension {
    fn fail(&self, point: HookPoint) -> Result<(), HookError> {
        if point != self.point {
            return Ok(());
        }
        if self.panics {
            panic!("{point} hook exploded");
        }
        Err(HookError::Failed(format!("{point} hook failed").into()))
    }
}

impl Extension for FailingExtension {
    fn name(&self) -> &str {
        "failing"
    }

    fn hooks(&self) -> HookSet {
        self.point.flag()
    }

    fn before_publish(&self, _ctx: &PublishContext<'_>) -> Result<(), HookError> {
        self.fail(HookPoint::BeforePublish)
    }

    fn after_publish(&self, _ctx: &PublishContext<'_>) -> Result<(), HookError> {
        self.fail(HookPoint::AfterPublish)
    }

    fn before_handle(&self, _ctx: &HandleContext<'_>) -> Result<(), HookError> {
        self.fail(HookPoint::BeforeHandle)
    }

    fn after_handle(&self, _ctx: &HandleContext<'_>) -> Result<(), HookError> {
        self.fail(HookPoint::AfterHandle)
    }

    fn on_fault(&self, _fault: &Fault<'_>) -> FaultHandling {
        FaultHandling::Unhandled
    }
}
