//! Distribution of firings across brokers.
//!
//! A [`DistributedExtension`] snapshots every locally originated firing into
//! an [`EventFired`] and hands it to an [`EventBus`]. On the receiving side
//! an [`EventFiredHandler`] resolves the destination broker through a
//! [`BrokerDirectory`] and re-publishes the firing there with
//! [`Sender::Remote`]. Firings that are already remote, or that an
//! extension produced, are never forwarded again.
//!
//! Delivery over the bus is fire-and-forget; no guarantee is made across
//! process boundaries.

use crate::{
    broker::{Broker, WeakBroker},
    pipeline::{Extension, PublishContext},
};
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;
use tidings_core::{
    BoxError, BrokerError, FiredMessage, HandlerRestriction, HookError, HookSet, Payload,
    PayloadType, Sender,
};
use tracing::{debug, trace};

/// A firing as it travels over a bus.
#[derive(Debug, Clone)]
pub struct EventFired {
    /// Identification of the broker that should re-publish the firing.
    pub broker_id: Arc<str>,
    /// Topic fired.
    pub topic: Arc<str>,
    /// Restriction declared by the publication that fired.
    pub restriction: HandlerRestriction,
    /// Type of `payload`.
    pub payload_type: PayloadType,
    /// The event arguments.
    pub payload: Payload,
}

impl EventFired {
    fn from_message(broker_id: &Arc<str>, message: &FiredMessage) -> Self {
        Self {
            broker_id: broker_id.clone(),
            topic: message.topic_name().clone(),
            restriction: message.restriction(),
            payload_type: message.payload().payload_type(),
            payload: message.payload().clone(),
        }
    }
}

/// Transport between brokers.
///
/// `publish` must not block on delivery. Implementations report failures
/// that happen after `publish` returned through their own channel.
pub trait EventBus: Send + Sync + 'static {
    /// Send `message` to every listening broker.
    fn publish(&self, message: EventFired) -> Result<(), BoxError>;
}

/// Errors raised while handling an [`EventFired`].
#[derive(Error, Debug)]
pub enum DistributionError {
    /// No live broker is registered under the identification.
    #[error("no broker registered as `{0}`")]
    UnknownBroker(String),

    /// The destination broker rejected the firing.
    #[error("failed to re-publish distributed firing")]
    Publish(#[from] BrokerError),
}

/// Resolves broker identifications to live brokers.
///
/// Cloning yields a handle on the same directory. Brokers are held weakly.
#[derive(Clone, Default)]
pub struct BrokerDirectory {
    brokers: Arc<RwLock<HashMap<Arc<str>, WeakBroker>>>,
}

impl BrokerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `broker` as `id`, replacing any previous entry.
    pub fn register(&self, id: impl Into<Arc<str>>, broker: WeakBroker) {
        self.brokers.write().insert(id.into(), broker);
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.brokers.write().remove(id).is_some()
    }

    /// The live broker registered as `id`.
    pub fn resolve(&self, id: &str) -> Option<Broker> {
        self.brokers.read().get(id).and_then(WeakBroker::upgrade)
    }
}

impl fmt::Debug for BrokerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let brokers = self.brokers.read();
        let mut ids: Vec<&str> = brokers.keys().map(|id| &**id).collect();
        ids.sort_unstable();
        f.debug_struct("BrokerDirectory").field("brokers", &ids).finish()
    }
}

/// Re-publishes [`EventFired`] messages arriving from a bus.
#[derive(Debug, Clone)]
pub struct EventFiredHandler {
    directory: BrokerDirectory,
}

impl EventFiredHandler {
    /// Create a handler resolving brokers through `directory`.
    pub fn new(directory: BrokerDirectory) -> Self {
        Self { directory }
    }

    /// Publish `message` into the broker it names.
    pub fn handle(&self, message: &EventFired) -> Result<(), DistributionError> {
        let broker = self
            .directory
            .resolve(&message.broker_id)
            .ok_or_else(|| DistributionError::UnknownBroker(message.broker_id.to_string()))?;
        trace!(
            broker = %message.broker_id,
            topic = %message.topic,
            "re-publishing distributed firing"
        );
        let fired = FiredMessage::new(
            message.topic.clone(),
            Sender::Remote(message.broker_id.clone()),
            message.payload.clone(),
        )
        .with_restriction(message.restriction);
        broker.publish_message(fired)?;
        Ok(())
    }
}

type Selection = Arc<dyn Fn(&FiredMessage) -> bool + Send + Sync>;

/// Forwards locally originated firings to an [`EventBus`].
pub struct DistributedExtension {
    id: Arc<str>,
    bus: Arc<dyn EventBus>,
    directory: BrokerDirectory,
    selection: Selection,
}

impl DistributedExtension {
    /// Distribute every topic under the identification `id`.
    ///
    /// When attached, the broker is registered in `directory` as `id`.
    pub fn new(id: impl Into<Arc<str>>, bus: Arc<dyn EventBus>, directory: BrokerDirectory) -> Self {
        Self {
            id: id.into(),
            bus,
            directory,
            selection: Arc::new(|_: &FiredMessage| true),
        }
    }

    /// Only distribute firings for which `select` returns `true`.
    pub fn with_selection<F>(mut self, select: F) -> Self
    where
        F: Fn(&FiredMessage) -> bool + Send + Sync + 'static,
    {
        self.selection = Arc::new(select);
        self
    }

    /// The identification firings are distributed under.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for DistributedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedExtension")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Extension for DistributedExtension {
    fn name(&self) -> &str {
        "distributed"
    }

    fn hooks(&self) -> HookSet {
        HookSet::BEFORE_PUBLISH
    }

    fn attached(&self, broker: &WeakBroker) {
        debug!(id = %self.id, "registering broker for distribution");
        self.directory.register(self.id.clone(), broker.clone());
    }

    fn before_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        let message = ctx.message();
        if !message.sender().is_local() || !(self.selection)(message) {
            return Ok(());
        }
        trace!(id = %self.id, topic = message.topic(), "distributing");
        self.bus
            .publish(EventFired::from_message(&self.id, message))
            .map_err(HookError::Failed)
    }
}
