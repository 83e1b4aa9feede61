//! MAVLink mission transfer: the protocol state machines that move an
//! ordered list of mission items between a ground station and an autopilot
//! over an unreliable datagram link.
//!
//! The crate is transport-agnostic. Outbound messages leave through a
//! [`Sender`], inbound messages arrive through [`MessageRouter`]
//! subscriptions, and timeouts fire through a [`TimeoutScheduler`]. A
//! periodic [`MissionTransfer::do_work`] tick, driven by the owning event
//! loop, promotes queued operations; everything else is event-driven with
//! no blocking or internal suspension points.

pub mod error;
pub mod item;
pub mod ports;
pub mod transfer;

pub use error::TransferError;
pub use item::MissionItemInt;
pub use ports::{
    Autopilot, MessageCallback, MessageRouter, Sender, SubscriptionId, TimeoutScheduler,
    TimerCallback, TimerId,
};
pub use transfer::{
    ItemsCallback, MissionTransfer, ProgressCallback, ResultCallback, TimeoutSource,
    TransferHandle, WorkItem, MAX_ITEM_COUNT, RETRY_BUDGET,
};
