//! Payload mapping across topic boundaries.
//!
//! Remote brokers rarely share payload types with the local one. The
//! [`MappingExtension`] watches firings re-published from a bus, asks a
//! [`TopicConvention`] whether and where to forward them, converts the
//! payload with a [`Mapper`] into the type the [`DestinationTypeProvider`]
//! names, and publishes the result on the destination topic.

use crate::pipeline::{Extension, PublishContext};
use std::{collections::HashMap, fmt, sync::Arc};
use tidings_core::{
    BoxError, BrokerError, Fault, FiredMessage, HookError, HookSet, MappingFault, Message, Payload,
    PayloadType, Sender, TopicInfo,
};
use tracing::trace;

/// Converts payloads between types.
pub trait Mapper: Send + Sync + 'static {
    /// Convert `payload`, of type `source`, into a `destination`.
    fn map(
        &self,
        source: PayloadType,
        destination: PayloadType,
        payload: &Payload,
    ) -> Result<Payload, BoxError>;
}

/// Names the payload type a destination topic expects.
pub trait DestinationTypeProvider: Send + Sync + 'static {
    /// The type handlers of `destination_topic` expect, given the source type.
    fn destination_type(&self, destination_topic: &str, source: PayloadType) -> PayloadType;
}

impl<F> DestinationTypeProvider for F
where
    F: Fn(&str, PayloadType) -> PayloadType + Send + Sync + 'static,
{
    fn destination_type(&self, destination_topic: &str, source: PayloadType) -> PayloadType {
        self(destination_topic, source)
    }
}

/// Decides which topics are mapped and what they are renamed to.
pub trait TopicConvention: Send + Sync + 'static {
    /// Whether firings on `topic` should be mapped.
    fn is_candidate(&self, topic: &TopicInfo) -> bool;

    /// The destination topic for `topic`.
    fn map_topic(&self, topic: &str) -> String;
}

/// A [`TopicConvention`] built from two closures.
pub struct FnTopicConvention<C, M> {
    candidate: C,
    rename: M,
}

impl<C, M> FnTopicConvention<C, M>
where
    C: Fn(&TopicInfo) -> bool + Send + Sync + 'static,
    M: Fn(&str) -> String + Send + Sync + 'static,
{
    /// `candidate` selects topics, `rename` maps their names.
    pub fn new(candidate: C, rename: M) -> Self {
        Self { candidate, rename }
    }
}

impl<C, M> TopicConvention for FnTopicConvention<C, M>
where
    C: Fn(&TopicInfo) -> bool + Send + Sync + 'static,
    M: Fn(&str) -> String + Send + Sync + 'static,
{
    fn is_candidate(&self, topic: &TopicInfo) -> bool {
        (self.candidate)(topic)
    }

    fn map_topic(&self, topic: &str) -> String {
        (self.rename)(topic)
    }
}

type Conversion = Box<dyn Fn(&Payload) -> Result<Payload, BoxError> + Send + Sync>;

/// A [`Mapper`] backed by explicitly registered conversions.
///
/// Payloads whose source and destination types agree pass through
/// unchanged.
///
/// # Example
///
/// ```rust
/// use tidings::extensions::mapping::{Mapper, MappingTable};
/// use tidings::{Payload, PayloadType};
///
/// let mut table = MappingTable::new();
/// table.register(|celsius: &u32| Ok(u64::from(*celsius) * 9 / 5 + 32));
///
/// let mapped = table
///     .map(PayloadType::of::<u32>(), PayloadType::of::<u64>(), &Payload::new(100u32))
///     .unwrap();
/// assert_eq!(mapped.downcast_ref::<u64>(), Some(&212));
/// ```
#[derive(Default)]
pub struct MappingTable {
    conversions: HashMap<(PayloadType, PayloadType), Conversion>,
}

impl MappingTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the conversion from `S` to `D`, replacing any previous one.
    pub fn register<S, D, F>(&mut self, convert: F) -> &mut Self
    where
        S: Message,
        D: Message,
        F: Fn(&S) -> Result<D, BoxError> + Send + Sync + 'static,
    {
        let conversion: Conversion = Box::new(move |payload: &Payload| -> Result<Payload, BoxError> {
            let source = payload.downcast_ref::<S>().ok_or_else(|| {
                format!("payload is {}, not {}", payload.payload_type(), PayloadType::of::<S>())
            })?;
            convert(source).map(Payload::new)
        });
        self.conversions
            .insert((PayloadType::of::<S>(), PayloadType::of::<D>()), conversion);
        self
    }

    /// Number of registered conversions.
    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    /// Whether no conversion is registered.
    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

impl Mapper for MappingTable {
    fn map(
        &self,
        source: PayloadType,
        destination: PayloadType,
        payload: &Payload,
    ) -> Result<Payload, BoxError> {
        if source == destination {
            return Ok(payload.clone());
        }
        let conversion = self
            .conversions
            .get(&(source, destination))
            .ok_or_else(|| format!("no conversion from {source} to {destination}"))?;
        conversion(payload)
    }
}

impl fmt::Debug for MappingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.conversions.keys()).finish()
    }
}

/// Republishes remote firings as mapped payloads on local topics.
pub struct MappingExtension {
    name: Arc<str>,
    mapper: Box<dyn Mapper>,
    convention: Box<dyn TopicConvention>,
    provider: Box<dyn DestinationTypeProvider>,
}

impl MappingExtension {
    /// Create the extension; it is named `mapping`.
    pub fn new(
        mapper: impl Mapper,
        convention: impl TopicConvention,
        provider: impl DestinationTypeProvider,
    ) -> Self {
        Self {
            name: Arc::from("mapping"),
            mapper: Box::new(mapper),
            convention: Box::new(convention),
            provider: Box::new(provider),
        }
    }

    /// Rename the extension. The name is the sender of mapped firings.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    fn map_payload(
        &self,
        message: &FiredMessage,
        destination_topic: &str,
    ) -> Result<Payload, MappingFault> {
        let from = message.payload().payload_type();
        let to = self.provider.destination_type(destination_topic, from);
        let mapped = match self.mapper.map(from, to, message.payload()) {
            Ok(payload) if payload.payload_type() == to => Ok(payload),
            Ok(payload) => Err(format!("mapper produced {}", payload.payload_type()).into()),
            Err(cause) => Err(cause),
        };
        mapped.map_err(|cause| MappingFault {
            topic: message.topic_name().clone(),
            destination_topic: destination_topic.to_string(),
            from_type: from,
            to_type: to,
            cause,
        })
    }
}

impl fmt::Debug for MappingExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingExtension")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Extension for MappingExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        HookSet::BEFORE_PUBLISH
    }

    fn before_publish(&self, ctx: &PublishContext<'_>) -> Result<(), HookError> {
        let message = ctx.message();
        if !matches!(message.sender(), Sender::Remote(_)) {
            return Ok(());
        }
        let broker = ctx.broker();
        if !self.convention.is_candidate(&broker.topic_info(message.topic())) {
            return Ok(());
        }
        let destination_topic = self.convention.map_topic(message.topic());
        if destination_topic == message.topic() {
            return Ok(());
        }

        let payload = self.map_payload(message, &destination_topic)?;
        trace!(
            from = message.topic(),
            to = %destination_topic,
            "publishing mapped firing"
        );
        let mapped =
            FiredMessage::new(destination_topic, Sender::Extension(self.name.clone()), payload)
                .with_restriction(message.restriction());
        match broker.publish_message(mapped) {
            Ok(()) => Ok(()),
            // Already offered to the fault hooks by the nested publish, and
            // there is no caller left that could handle them.
            Err(BrokerError::HandlerFaults { faults, .. }) => {
                for fault in &faults {
                    broker.record_unhandled(Fault::Handler(fault));
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
