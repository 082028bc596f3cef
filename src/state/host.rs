//! Interfaces to the host application.

use super::denomination::Denomination;
use super::resolver::{Resolver, ResolverId};
use super::unprompted::RollRecord;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// The UI boundary: notifications and re-render hooks.
pub trait DisplayAdapter: Send {
    fn notify(&mut self, level: NoticeLevel, message: &str);

    /// The set of known devices or their connectivity changed.
    fn registry_changed(&mut self) {}

    /// A resolver's terms changed.
    fn resolver_changed(&mut self, _resolver: &Resolver) {}

    /// A resolver is complete and its submit control should be disabled.
    fn resolver_locked(&mut self, _id: ResolverId) {}

    /// A resolver left the queue and its form should close.
    fn resolver_closed(&mut self, _id: ResolverId) {}
}

/// Display adapter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplayAdapter for NullDisplay {
    fn notify(&mut self, _level: NoticeLevel, _message: &str) {}
}

/// Display adapter that keeps what it was told. Useful for headless hosts
/// and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingDisplay {
    pub notices: Vec<(NoticeLevel, String)>,
    pub registry_renders: usize,
    pub resolver_renders: usize,
    pub locked: Vec<ResolverId>,
    pub closed: Vec<ResolverId>,
}

impl DisplayAdapter for RecordingDisplay {
    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.notices.push((level, message.to_string()));
    }

    fn registry_changed(&mut self) {
        self.registry_renders += 1;
    }

    fn resolver_changed(&mut self, _resolver: &Resolver) {
        self.resolver_renders += 1;
    }

    fn resolver_locked(&mut self, id: ResolverId) {
        self.locked.push(id);
    }

    fn resolver_closed(&mut self, id: ResolverId) {
        self.closed.push(id);
    }
}

/// The host's logical-roll fulfillment registry.
pub trait FulfillmentRegistry {
    /// Offer a physical result. Returns whether a logical roll accepted it.
    fn register_result(&mut self, provider: &str, denomination: Denomination, value: u32)
        -> bool;
}

impl<F> FulfillmentRegistry for F
where
    F: FnMut(&str, Denomination, u32) -> bool,
{
    fn register_result(&mut self, provider: &str, denomination: Denomination, value: u32) -> bool {
        self(provider, denomination, value)
    }
}

/// Where finalized unprompted rolls go.
pub trait RollSink: Send {
    fn submit(&mut self, record: RollRecord);
}

impl RollSink for Vec<RollRecord> {
    fn submit(&mut self, record: RollRecord) {
        self.push(record);
    }
}
