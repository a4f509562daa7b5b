//! Message trait, payloads and fired-message snapshots.

use crate::{endpoint::OwnerId, policy::HandlerRestriction};
use std::{
    any::{Any, TypeId},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// A marker trait for event arguments carried through the broker.
///
/// Messages must be `Send + Sync + 'static` so that a single firing can be
/// shared by handlers running on different threads.
///
/// # Example
///
/// ```rust
/// use tidings_core::Message;
///
/// #[derive(Clone)]
/// struct OrderPlaced { id: u64 }
///
/// impl Message for OrderPlaced {}
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid Message",
    label = "must be `Send + Sync + 'static`",
    note = "Event arguments must be thread-safe and static."
)]
pub trait Message: Send + Sync + 'static {}

// Common Message implementations
impl Message for () {}
impl Message for String {}
impl Message for &'static str {}
impl Message for u32 {}
impl Message for u64 {}
impl Message for i64 {}
impl<T: Message> Message for Box<T> {}
impl<T: Message> Message for Arc<T> {}
impl<T: Message> Message for Vec<T> {}
impl<T: Message> Message for Option<T> {}

/// Event arguments for events that carry no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Empty;

impl Message for Empty {}

/// The runtime shape of a payload.
///
/// Two payload types are equal when they describe the same Rust type; the
/// name is carried along for diagnostics only.
#[derive(Clone, Copy)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    /// The payload type describing `T`.
    pub fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying [`TypeId`].
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The Rust type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PayloadType {}

impl Hash for PayloadType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PayloadType").field(&self.name).finish()
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased event arguments.
///
/// The broker never looks inside a payload; handlers recover the concrete
/// type with [`Payload::downcast_ref`]. Cloning is cheap (reference counted).
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    ty: PayloadType,
}

impl Payload {
    /// Wrap a message value.
    pub fn new<T: Message>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            ty: PayloadType::of::<T>(),
        }
    }

    /// A payload carrying [`Empty`].
    pub fn empty() -> Self {
        Self::new(Empty)
    }

    /// The runtime type of the wrapped value.
    pub fn payload_type(&self) -> PayloadType {
        self.ty
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.ty == PayloadType::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.ty.name)
            .finish_non_exhaustive()
    }
}

/// Identity of whoever published a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sender {
    /// Published without a registered publication.
    Anonymous,
    /// Fired through the publication of a registered instance.
    Publisher(OwnerId),
    /// Re-published from a distribution bus on behalf of the named broker.
    Remote(Arc<str>),
    /// Published by the named extension.
    Extension(Arc<str>),
}

impl Sender {
    /// Whether the message originated in this process rather than arriving
    /// from a bus or being derived by an extension.
    pub fn is_local(&self) -> bool {
        matches!(self, Sender::Anonymous | Sender::Publisher(_))
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Anonymous => f.write_str("anonymous"),
            Sender::Publisher(owner) => write!(f, "publisher {owner}"),
            Sender::Remote(broker) => write!(f, "remote broker `{broker}`"),
            Sender::Extension(name) => write!(f, "extension `{name}`"),
        }
    }
}

/// An immutable record of one publish.
///
/// A single `FiredMessage` is shared by every dispatch of the publish that
/// created it.
#[derive(Debug, Clone)]
pub struct FiredMessage {
    topic: Arc<str>,
    sender: Sender,
    restriction: HandlerRestriction,
    payload: Payload,
}

impl FiredMessage {
    /// Create an unrestricted message.
    pub fn new(topic: impl Into<Arc<str>>, sender: Sender, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            sender,
            restriction: HandlerRestriction::None,
            payload,
        }
    }

    /// Set the handler restriction the publisher declared.
    pub fn with_restriction(mut self, restriction: HandlerRestriction) -> Self {
        self.restriction = restriction;
        self
    }

    /// The topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The topic name as a shared string.
    pub fn topic_name(&self) -> &Arc<str> {
        &self.topic
    }

    /// Who published the message.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// The restriction declared by the publisher.
    pub fn restriction(&self) -> HandlerRestriction {
        self.restriction
    }

    /// The event arguments.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Shorthand for `self.payload().downcast_ref::<T>()`.
    pub fn args<T: Message>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl Message for FiredMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    impl Message for Ping {}

    #[test]
    fn payload_downcasts_to_the_wrapped_type_only() {
        let payload = Payload::new(Ping(7));

        assert!(payload.is::<Ping>());
        assert_eq!(payload.downcast_ref::<Ping>(), Some(&Ping(7)));
        assert!(payload.downcast_ref::<Empty>().is_none());
        assert_eq!(payload.payload_type(), PayloadType::of::<Ping>());
    }

    #[test]
    fn payload_type_equality_ignores_clones() {
        let a = Payload::empty();
        let b = a.clone();
        assert_eq!(a.payload_type(), b.payload_type());
        assert_ne!(a.payload_type(), PayloadType::of::<String>());
        assert!(a.payload_type().name().ends_with("Empty"));
    }

    #[test]
    fn only_anonymous_and_publisher_senders_are_local() {
        assert!(Sender::Anonymous.is_local());
        assert!(!Sender::Remote("peer".into()).is_local());
        assert!(!Sender::Extension("mapping".into()).is_local());
    }

    #[test]
    fn fired_message_defaults_to_unrestricted() {
        let message = FiredMessage::new("topic", Sender::Anonymous, Payload::new(Ping(1)));
        assert_eq!(message.restriction(), HandlerRestriction::None);
        assert_eq!(message.topic(), "topic");
        assert_eq!(message.args::<Ping>(), Some(&Ping(1)));

        let restricted = message.with_restriction(HandlerRestriction::Asynchronous);
        assert_eq!(restricted.restriction(), HandlerRestriction::Asynchronous);
    }
}
