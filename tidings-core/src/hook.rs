//! Hook points of the publish/dispatch cycle.

use bitflags::bitflags;
use std::fmt;

/// A point in the publish/dispatch cycle at which extensions are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before subscriptions are looked up.
    BeforePublish,
    /// After every subscription has been dispatched or scheduled.
    AfterPublish,
    /// Before a handler runs, on the thread that runs it.
    BeforeHandle,
    /// After a handler ran, whatever its outcome.
    AfterHandle,
    /// When a handler or an extension failed.
    Fault,
}

impl HookPoint {
    /// The capability flag corresponding to this point.
    pub fn flag(self) -> HookSet {
        match self {
            HookPoint::BeforePublish => HookSet::BEFORE_PUBLISH,
            HookPoint::AfterPublish => HookSet::AFTER_PUBLISH,
            HookPoint::BeforeHandle => HookSet::BEFORE_HANDLE,
            HookPoint::AfterHandle => HookSet::AFTER_HANDLE,
            HookPoint::Fault => HookSet::FAULT,
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPoint::BeforePublish => "before-publish",
            HookPoint::AfterPublish => "after-publish",
            HookPoint::BeforeHandle => "before-handle",
            HookPoint::AfterHandle => "after-handle",
            HookPoint::Fault => "fault",
        })
    }
}

bitflags! {
    /// The hooks an extension implements.
    ///
    /// The broker only calls hooks whose flag is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookSet: u8 {
        /// `before_publish`
        const BEFORE_PUBLISH = 1 << 0;
        /// `after_publish`
        const AFTER_PUBLISH = 1 << 1;
        /// `before_handle`
        const BEFORE_HANDLE = 1 << 2;
        /// `after_handle`
        const AFTER_HANDLE = 1 << 3;
        /// `on_fault`
        const FAULT = 1 << 4;

        /// Both publish hooks.
        const PUBLISH = Self::BEFORE_PUBLISH.bits() | Self::AFTER_PUBLISH.bits();
        /// Both handle hooks.
        const HANDLE = Self::BEFORE_HANDLE.bits() | Self::AFTER_HANDLE.bits();
    }
}

/// Answer of a fault hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultHandling {
    /// The extension took care of the fault.
    Handled,
    /// The extension observed the fault but did not handle it.
    #[default]
    Unhandled,
}
