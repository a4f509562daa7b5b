//! Error types for tidings.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`BrokerError`] - Errors returned synchronously by broker operations
//! - [`HandlerFault`] - A handler failed (returned an error or panicked)
//! - [`ExtensionFault`] - An extension hook failed
//! - [`MappingFault`] - A payload could not be converted for another topic
//! - [`Fault`] - Borrowed view over the three faults, handed to fault hooks
//! - [`HookError`] - What an extension hook returns on failure

use crate::{
    endpoint::{EndpointId, OwnerId},
    hook::HookPoint,
    message::PayloadType,
    policy::{DispatchPolicy, HandlerRestriction},
};
use std::{any::Any, fmt, sync::Arc};
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The endpoint is already registered.
    #[error("endpoint {endpoint} on topic `{topic}` is already registered")]
    DuplicateRegistration {
        /// The conflicting endpoint.
        endpoint: EndpointId,
        /// Its topic.
        topic: Arc<str>,
    },

    /// A subscription cannot satisfy a publication's restriction.
    #[error("{policy} subscription on topic `{topic}` violates {restriction} publication")]
    IncompatibleDispatchPolicy {
        /// The topic both endpoints share.
        topic: Arc<str>,
        /// The publication's restriction.
        restriction: HandlerRestriction,
        /// The subscription's policy.
        policy: DispatchPolicy,
    },

    /// The instance declared no publication for the topic it tried to fire.
    #[error("{owner} declares no publication for topic `{topic}`")]
    UnknownPublication {
        /// The firing instance.
        owner: OwnerId,
        /// The topic it tried to fire.
        topic: Arc<str>,
    },

    /// Synchronous handlers failed and no extension handled the faults.
    #[error("{} synchronous handler(s) failed on topic `{topic}`", .faults.len())]
    HandlerFaults {
        /// The topic that was published.
        topic: Arc<str>,
        /// Every unhandled fault, in dispatch order.
        faults: Vec<HandlerFault>,
    },

    /// A dispatch worker thread could not be started.
    #[error("failed to spawn dispatch worker")]
    WorkerSpawn(#[source] std::io::Error),
}

/// What went wrong inside a handler or hook.
#[derive(Error, Debug)]
pub enum FaultCause {
    /// The callee returned an error.
    #[error(transparent)]
    Error(BoxError),

    /// The callee panicked.
    #[error("panicked: {0}")]
    Panic(String),
}

impl FaultCause {
    /// Build a cause from the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        FaultCause::Panic(message)
    }

    /// Whether the callee panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, FaultCause::Panic(_))
    }
}

/// A handler failed during dispatch.
#[derive(Error, Debug)]
#[error("{policy} handler {subscription} on topic `{topic}` failed: {cause}")]
pub struct HandlerFault {
    /// The published topic.
    pub topic: Arc<str>,
    /// The failing subscription.
    pub subscription: EndpointId,
    /// How the handler was dispatched.
    pub policy: DispatchPolicy,
    /// What went wrong.
    pub cause: FaultCause,
}

/// An extension hook failed.
#[derive(Error, Debug)]
#[error("extension `{extension}` failed in {hook} hook for topic `{topic}`: {cause}")]
pub struct ExtensionFault {
    /// Name of the failing extension.
    pub extension: String,
    /// The hook that failed.
    pub hook: HookPoint,
    /// Topic of the message being processed.
    pub topic: Arc<str>,
    /// What went wrong.
    pub cause: FaultCause,
}

/// A payload could not be converted for its destination topic.
#[derive(Error, Debug)]
#[error("cannot map `{topic}` ({from_type}) to `{destination_topic}` ({to_type}): {cause}")]
pub struct MappingFault {
    /// Topic the payload arrived on.
    pub topic: Arc<str>,
    /// Topic the converted payload was meant for.
    pub destination_topic: String,
    /// Type of the arriving payload.
    pub from_type: PayloadType,
    /// Type the destination expects.
    pub to_type: PayloadType,
    /// The mapper's error.
    pub cause: BoxError,
}

/// A fault, as presented to extension fault hooks.
#[derive(Debug, Clone, Copy)]
pub enum Fault<'a> {
    /// A handler failed.
    Handler(&'a HandlerFault),
    /// An extension hook failed.
    Extension(&'a ExtensionFault),
    /// A payload mapping failed.
    Mapping(&'a MappingFault),
}

impl Fault<'_> {
    /// The topic being processed when the fault happened.
    pub fn topic(&self) -> &str {
        match self {
            Fault::Handler(fault) => &fault.topic,
            Fault::Extension(fault) => &fault.topic,
            Fault::Mapping(fault) => &fault.topic,
        }
    }
}

impl fmt::Display for Fault<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Handler(fault) => fmt::Display::fmt(fault, f),
            Fault::Extension(fault) => fmt::Display::fmt(fault, f),
            Fault::Mapping(fault) => fmt::Display::fmt(fault, f),
        }
    }
}

/// Errors an extension hook may return.
#[derive(Error, Debug)]
pub enum HookError {
    /// A payload could not be mapped.
    #[error(transparent)]
    Mapping(#[from] MappingFault),

    /// Any other failure.
    #[error(transparent)]
    Failed(BoxError),
}

impl From<BoxError> for HookError {
    fn from(err: BoxError) -> Self {
        HookError::Failed(err)
    }
}

impl From<BrokerError> for HookError {
    fn from(err: BrokerError) -> Self {
        HookError::Failed(Box::new(err))
    }
}
