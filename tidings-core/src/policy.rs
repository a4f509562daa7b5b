//! Dispatch policies and publication restrictions.

use std::fmt;

/// How a subscription's handler is scheduled relative to the publishing call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DispatchPolicy {
    /// Run inline on the publisher's thread before `publish` returns.
    #[default]
    Synchronous,
    /// Queue on the broker's shared worker pool.
    Asynchronous,
    /// Queue on a worker thread dedicated to the subscription.
    Background,
}

impl DispatchPolicy {
    /// Whether the handler runs on the publishing thread.
    pub fn is_synchronous(self) -> bool {
        matches!(self, DispatchPolicy::Synchronous)
    }
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchPolicy::Synchronous => "synchronous",
            DispatchPolicy::Asynchronous => "asynchronous",
            DispatchPolicy::Background => "background",
        })
    }
}

/// The dispatch expectation a publication declares for its handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HandlerRestriction {
    /// Any policy is acceptable.
    #[default]
    None,
    /// Handlers must complete before the publisher continues.
    Synchronous,
    /// Handlers must not run on the publisher's thread.
    Asynchronous,
}

impl HandlerRestriction {
    /// Whether a subscription using `policy` satisfies this restriction.
    pub fn permits(self, policy: DispatchPolicy) -> bool {
        match self {
            HandlerRestriction::None => true,
            HandlerRestriction::Synchronous => policy.is_synchronous(),
            HandlerRestriction::Asynchronous => !policy.is_synchronous(),
        }
    }
}

impl fmt::Display for HandlerRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerRestriction::None => "unrestricted",
            HandlerRestriction::Synchronous => "synchronous-only",
            HandlerRestriction::Asynchronous => "asynchronous-only",
        })
    }
}
