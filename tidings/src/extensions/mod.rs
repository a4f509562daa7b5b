//! Standard extensions.
//!
//! - [`distributed`]: forwards local firings to an [`EventBus`](distributed::EventBus)
//!   and re-publishes what arrives from it.
//! - [`mapping`]: converts remote payloads into the types local topics expect.
//! - [`logging`]: traces every hook point.

pub mod distributed;
pub mod logging;
pub mod mapping;
