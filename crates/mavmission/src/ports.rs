//! External collaborators of the transfer subsystem.
//!
//! The wire codec, the inbound dispatch layer and the timer wheel all live
//! outside this crate; work items reach them through these traits and hold
//! on to the opaque ids they hand back.

use mavlink::common::MavMessage;
use std::time::Duration;

/// Autopilot flavor of the connected peer, as learned from its heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Autopilot {
    #[default]
    Unknown,
    Px4,
    ArduPilot,
}

/// Outbound half of the link.
pub trait Sender: Send + Sync {
    /// Queue a message for transmission. `false` means the link rejected it.
    fn send_message(&self, message: &MavMessage) -> bool;
    fn own_system_id(&self) -> u8;
    fn own_component_id(&self) -> u8;
    /// System id of the connected peer.
    fn target_system_id(&self) -> u8;
    fn autopilot(&self) -> Autopilot;
}

/// Opaque handle to a message subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Opaque handle to a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

pub type MessageCallback = Box<dyn FnMut(&MavMessage) + Send>;
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// Inbound message dispatch.
///
/// Implementations must not hold internal locks while invoking callbacks,
/// and must accept `subscribe`/`unsubscribe` calls made from within a
/// delivered callback.
pub trait MessageRouter: Send + Sync {
    /// Register for inbound messages with the given MAVLink message id.
    fn subscribe(&self, message_id: u32, callback: MessageCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// One-shot timeout scheduling.
///
/// A timer fires at most once per arming: firing disarms it, but the
/// registration stays valid until [`remove`](TimeoutScheduler::remove).
/// [`refresh`](TimeoutScheduler::refresh) re-arms it for the full duration.
/// The locking rule of [`MessageRouter`] applies here as well.
pub trait TimeoutScheduler: Send + Sync {
    fn add(&self, duration: Duration, callback: TimerCallback) -> TimerId;
    fn refresh(&self, id: TimerId);
    fn remove(&self, id: TimerId);
}
