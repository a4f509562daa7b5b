//! # tidings-core
//!
//! Shared vocabulary for the tidings in-process event broker.
//!
//! This crate has minimal dependencies and is meant to be imported by
//! publishers, subscribers and extensions that only need to talk *about*
//! events, without pulling in the dispatch engine from `tidings`.
//!
//! # Contents
//!
//! - **Messages**: the [`Message`] marker trait, type-erased [`Payload`]s and
//!   the immutable [`FiredMessage`] snapshot handed to every handler.
//! - **Policies**: [`DispatchPolicy`] chosen by subscriptions and the
//!   [`HandlerRestriction`] declared by publications.
//! - **Endpoints**: the [`Endpoints`] trait through which an instance
//!   declares what it publishes and what it handles.
//! - **Hooks**: [`HookPoint`] and the [`HookSet`] capability flags used by
//!   extensions.
//! - **Errors**: [`BrokerError`], the [`Fault`] view passed to fault hooks
//!   and the concrete fault records behind it.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod endpoint;
mod error;
mod hook;
mod message;
mod policy;

// Re-exports
pub use endpoint::{
    Declarations, EndpointId, Endpoints, HandlerFn, OwnerId, PublicationDecl, PublicationInfo,
    SubscriptionDecl, SubscriptionInfo, TopicInfo,
};
pub use error::{
    BoxError, BrokerError, ExtensionFault, Fault, FaultCause, HandlerFault, HookError,
    MappingFault,
};
pub use hook::{FaultHandling, HookPoint, HookSet};
pub use message::{Empty, FiredMessage, Message, Payload, PayloadType, Sender};
pub use policy::{DispatchPolicy, HandlerRestriction};
