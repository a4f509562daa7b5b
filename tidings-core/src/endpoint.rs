//! Endpoint declarations and identities.
//!
//! An instance takes part in brokering by implementing [`Endpoints`]: it
//! lists the topics it publishes (with a [`HandlerRestriction`]) and the
//! topics it handles (with a [`DispatchPolicy`] and a handler function).
//! The broker turns those declarations into registry endpoints that refer
//! back to the instance weakly.

use crate::{
    error::BoxError,
    message::FiredMessage,
    policy::{DispatchPolicy, HandlerRestriction},
};
use std::{fmt, sync::Arc};

/// Identity of a registered instance.
///
/// Derived from the address of the instance's `Arc` allocation, so it is
/// only unique among instances that are alive at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(usize);

impl OwnerId {
    /// The identity of `instance`.
    pub fn of<T: ?Sized>(instance: &Arc<T>) -> Self {
        Self(Arc::as_ptr(instance).cast::<()>() as usize)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{:x}", self.0)
    }
}

/// Identity of one declared endpoint: its owner plus its declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId {
    owner: OwnerId,
    ordinal: u32,
}

impl EndpointId {
    /// Create an endpoint id.
    pub fn new(owner: OwnerId, ordinal: u32) -> Self {
        Self { owner, ordinal }
    }

    /// The owning instance.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Position of the endpoint among its owner's declarations.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.ordinal)
    }
}

/// Handler function bound to the subscriber type `T`.
pub type HandlerFn<T> = Arc<dyn Fn(&T, &FiredMessage) -> Result<(), BoxError> + Send + Sync>;

/// A declared publication.
#[derive(Debug, Clone)]
pub struct PublicationDecl {
    /// Topic fired by the publication.
    pub topic: Arc<str>,
    /// Dispatch expectation for the topic's handlers.
    pub restriction: HandlerRestriction,
}

/// A declared subscription.
pub struct SubscriptionDecl<T> {
    /// Topic handled by the subscription.
    pub topic: Arc<str>,
    /// How the handler is scheduled.
    pub policy: DispatchPolicy,
    /// The handler.
    pub handler: HandlerFn<T>,
}

impl<T> fmt::Debug for SubscriptionDecl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDecl")
            .field("topic", &self.topic)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Collector passed to [`Endpoints::declare`].
///
/// # Example
///
/// ```rust
/// use tidings_core::{Declarations, DispatchPolicy, Endpoints, HandlerRestriction};
///
/// struct Audit;
///
/// impl Endpoints for Audit {
///     fn declare(&self, endpoints: &mut Declarations<Self>) {
///         endpoints
///             .publication("audit.flushed", HandlerRestriction::None)
///             .subscription("order.placed", DispatchPolicy::Background, |_audit, _message| Ok(()));
///     }
/// }
/// ```
pub struct Declarations<T> {
    publications: Vec<PublicationDecl>,
    subscriptions: Vec<SubscriptionDecl<T>>,
}

impl<T> Declarations<T> {
    /// Create an empty set of declarations.
    pub fn new() -> Self {
        Self {
            publications: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Declare a publication.
    pub fn publication(
        &mut self,
        topic: impl Into<Arc<str>>,
        restriction: HandlerRestriction,
    ) -> &mut Self {
        self.publications.push(PublicationDecl {
            topic: topic.into(),
            restriction,
        });
        self
    }

    /// Declare a subscription.
    pub fn subscription<F>(
        &mut self,
        topic: impl Into<Arc<str>>,
        policy: DispatchPolicy,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&T, &FiredMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscriptions.push(SubscriptionDecl {
            topic: topic.into(),
            policy,
            handler: Arc::new(handler),
        });
        self
    }

    /// Number of declared endpoints.
    pub fn len(&self) -> usize {
        self.publications.len() + self.subscriptions.len()
    }

    /// Whether nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into publications and subscriptions, each in declaration order.
    pub fn into_parts(self) -> (Vec<PublicationDecl>, Vec<SubscriptionDecl<T>>) {
        (self.publications, self.subscriptions)
    }
}

impl<T> Default for Declarations<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An instance that publishes and/or handles topics.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be registered with a broker",
    label = "missing `Endpoints` implementation",
    note = "Implement `Endpoints::declare` to list the topics `{Self}` publishes and handles."
)]
pub trait Endpoints: Send + Sync + Sized + 'static {
    /// Declare this instance's publications and subscriptions.
    fn declare(&self, endpoints: &mut Declarations<Self>);
}

/// Snapshot of a registered publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationInfo {
    /// Endpoint identity.
    pub id: EndpointId,
    /// Declared restriction.
    pub restriction: HandlerRestriction,
}

/// Snapshot of a registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Endpoint identity.
    pub id: EndpointId,
    /// Topic handled.
    pub topic: Arc<str>,
    /// Dispatch policy.
    pub policy: DispatchPolicy,
}

/// Snapshot of a topic and its live endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    /// Topic name.
    pub name: Arc<str>,
    /// Publications, in registration order.
    pub publications: Vec<PublicationInfo>,
    /// Subscriptions, in registration order.
    pub subscriptions: Vec<SubscriptionInfo>,
}

impl TopicInfo {
    /// A topic nobody has registered for.
    pub fn unregistered(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            publications: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Whether any endpoint is registered on the topic.
    pub fn is_registered(&self) -> bool {
        !self.publications.is_empty() || !self.subscriptions.is_empty()
    }
}
