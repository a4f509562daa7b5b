//! # tidings - In-Process Event Broker
//!
//! Publishers fire named topics, subscribers handle them, and the broker in
//! between matches topics, enforces dispatch policies and runs an extension
//! pipeline around every publish and every handler invocation.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use tidings::{Broker, Declarations, DispatchPolicy, Endpoints, HandlerRestriction, Payload};
//!
//! #[derive(Default)]
//! struct Shop {
//!     placed: AtomicUsize,
//! }
//!
//! impl Endpoints for Shop {
//!     fn declare(&self, endpoints: &mut Declarations<Self>) {
//!         endpoints
//!             .publication("order.placed", HandlerRestriction::None)
//!             .subscription("order.placed", DispatchPolicy::Synchronous, |shop, message| {
//!                 assert_eq!(message.args::<u64>(), Some(&42));
//!                 shop.placed.fetch_add(1, Ordering::SeqCst);
//!                 Ok(())
//!             });
//!     }
//! }
//!
//! let broker = Broker::new()?;
//! let shop = Arc::new(Shop::default());
//! broker.register(&shop)?;
//! broker.fire(&shop, "order.placed", Payload::new(42u64))?;
//! assert_eq!(shop.placed.load(Ordering::SeqCst), 1);
//! # Ok::<(), tidings::BrokerError>(())
//! ```
//!
//! ## Dispatch policies
//!
//! | Policy | Runs on | Faults |
//! |--------|---------|--------|
//! | [`DispatchPolicy::Synchronous`] | the publishing thread | returned to the publisher unless handled |
//! | [`DispatchPolicy::Asynchronous`] | the broker's worker pool | fault hooks, then the log |
//! | [`DispatchPolicy::Background`] | a thread owned by the subscription | fault hooks, then the log |
//!
//! Use [`Broker::wait_idle`] to join detached dispatch.
//!
//! ## Extensions
//!
//! Implement [`Extension`] to observe the publish/dispatch cycle. The
//! [`extensions`] module ships distribution over a bus, payload mapping and
//! logging.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod broker;
mod builder;
mod dispatch;
mod pipeline;
mod registry;
mod stats;

pub mod extensions;
pub mod testing;

pub use broker::{Broker, WeakBroker};
pub use builder::{BrokerBuilder, BrokerConfig};
pub use pipeline::{Extension, HandleContext, HandleOutcome, PublishContext};
pub use stats::BrokerStats;

pub use tidings_core::{
    BoxError, BrokerError, Declarations, DispatchPolicy, Empty, EndpointId, Endpoints,
    ExtensionFault, Fault, FaultCause, FaultHandling, FiredMessage, HandlerFault,
    HandlerRestriction, HookError, HookPoint, HookSet, MappingFault, Message, OwnerId, Payload,
    PayloadType, PublicationInfo, Sender, SubscriptionInfo, TopicInfo,
};
