//! Work-queue scheduler and the per-operation state machines.
//!
//! Each user-facing operation becomes a [`WorkItem`] appended to a FIFO.
//! The externally driven [`MissionTransfer::do_work`] tick starts the head
//! item; once started, the item owns its own progress through message
//! handlers and a timeout until it marks itself done and the next tick
//! discards it. At most one operation is on the wire at a time, so the
//! peer sees clean operation boundaries.

mod clear;
mod download;
mod receive;
mod set_current;
mod upload;

use crate::error::TransferError;
use crate::item::MissionItemInt;
use crate::ports::{
    MessageRouter, Sender, SubscriptionId, TimeoutScheduler, TimerCallback, TimerId,
};
use mavlink::common::{MavComponent, MavMessage, MavMissionResult, MavMissionType, MISSION_ACK_DATA};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::debug;

/// Upper bound on the number of items in a single transfer, set by the
/// 16-bit sequence space of the mission protocol.
pub const MAX_ITEM_COUNT: usize = u16::MAX as usize;

/// Re-sends allowed per protocol step before an operation times out.
pub const RETRY_BUDGET: u32 = 5;

pub(crate) const AUTOPILOT_COMPONENT: u8 = MavComponent::MAV_COMP_ID_AUTOPILOT1 as u8;

/// Invoked exactly once with the terminal outcome of an operation.
pub type ResultCallback = Box<dyn FnOnce(Result<(), TransferError>) + Send>;

/// Invoked exactly once with the terminal outcome and the received items.
pub type ItemsCallback = Box<dyn FnOnce(Result<Vec<MissionItemInt>, TransferError>) + Send>;

/// Invoked with the completed fraction after each transferred item. Must
/// not call back into the transfer.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Queried each time a timer is armed, so the timeout can track link
/// quality without reconfiguring the coordinator.
pub type TimeoutSource = Arc<dyn Fn() -> Duration + Send + Sync>;

/// A user callback extracted under the item lock, to be invoked after the
/// lock is released.
pub(crate) type DeferredCall = Box<dyn FnOnce() + Send>;

/// Shared access to the external ports, cloned into every work item.
#[derive(Clone)]
pub(crate) struct LinkPorts {
    pub(crate) sender: Arc<dyn Sender>,
    pub(crate) router: Arc<dyn MessageRouter>,
    pub(crate) timeouts: Arc<dyn TimeoutScheduler>,
    pub(crate) timeout_source: TimeoutSource,
}

pub(crate) fn mission_ack_message(
    ports: &LinkPorts,
    target_component: u8,
    status: MavMissionResult,
    mission_type: MavMissionType,
) -> MavMessage {
    MavMessage::MISSION_ACK(MISSION_ACK_DATA {
        target_system: ports.sender.target_system_id(),
        target_component,
        mavtype: status,
        mission_type,
        opaque_id: 0,
    })
}

/// Lifecycle state shared by every task kind. Transitions are monotonic:
/// queued, then started, then done.
pub(crate) struct BaseState {
    started: bool,
    done: bool,
    subscriptions: Vec<SubscriptionId>,
    timer: Option<TimerId>,
}

impl BaseState {
    fn new() -> Self {
        Self {
            started: false,
            done: false,
            subscriptions: Vec::new(),
            timer: None,
        }
    }

    /// Release the subscriptions and the timer and make `done` visible.
    /// Must run before the result callback is handed out.
    pub(crate) fn conclude(&mut self, ports: &LinkPorts) {
        self.done = true;
        for id in self.subscriptions.drain(..) {
            ports.router.unsubscribe(id);
        }
        if let Some(timer) = self.timer.take() {
            ports.timeouts.remove(timer);
        }
    }

    pub(crate) fn refresh_timer(&self, ports: &LinkPorts) {
        if let Some(timer) = self.timer {
            ports.timeouts.refresh(timer);
        }
    }
}

/// The five operation state machines, dispatched by tag.
pub(crate) enum Task {
    Upload(upload::UploadTask),
    Download(download::DownloadTask),
    Receive(receive::ReceiveTask),
    Clear(clear::ClearTask),
    SetCurrent(set_current::SetCurrentTask),
}

impl Task {
    fn message_ids(&self) -> &'static [u32] {
        match self {
            Task::Upload(_) => upload::MESSAGE_IDS,
            Task::Download(_) => download::MESSAGE_IDS,
            Task::Receive(_) => receive::MESSAGE_IDS,
            Task::Clear(_) => clear::MESSAGE_IDS,
            Task::SetCurrent(_) => set_current::MESSAGE_IDS,
        }
    }

    fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        match self {
            Task::Upload(task) => task.start(ports, base),
            Task::Download(task) => task.start(ports, base),
            Task::Receive(task) => task.start(ports, base),
            Task::Clear(task) => task.start(ports, base),
            Task::SetCurrent(task) => task.start(ports, base),
        }
    }

    fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match self {
            Task::Upload(task) => task.handle_message(ports, base, message),
            Task::Download(task) => task.handle_message(ports, base, message),
            Task::Receive(task) => task.handle_message(ports, base, message),
            Task::Clear(task) => task.handle_message(ports, base, message),
            Task::SetCurrent(task) => task.handle_message(ports, base, message),
        }
    }

    fn handle_timeout(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        match self {
            Task::Upload(task) => task.handle_timeout(ports, base),
            Task::Download(task) => task.handle_timeout(ports, base),
            Task::Receive(task) => task.handle_timeout(ports, base),
            Task::Clear(task) => task.handle_timeout(ports, base),
            Task::SetCurrent(task) => task.handle_timeout(ports, base),
        }
    }

    fn cancel(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        match self {
            Task::Upload(task) => task.cancel(ports, base),
            Task::Download(task) => task.cancel(ports, base),
            Task::Receive(task) => task.cancel(ports, base),
            Task::Clear(task) => task.cancel(ports, base),
            Task::SetCurrent(task) => task.cancel(ports, base),
        }
    }
}

/// One queued or in-flight mission operation.
///
/// Message and timer callbacks reach the item through `Weak` references,
/// so events arriving after the coordinator dropped it are no-ops.
pub struct WorkItem {
    ports: LinkPorts,
    inner: Mutex<ItemInner>,
}

struct ItemInner {
    base: BaseState,
    task: Task,
}

impl WorkItem {
    fn new(ports: LinkPorts, task: Task) -> Arc<Self> {
        Arc::new(Self {
            ports,
            inner: Mutex::new(ItemInner {
                base: BaseState::new(),
                task,
            }),
        })
    }

    pub fn has_started(&self) -> bool {
        self.lock_inner().base.started
    }

    pub fn is_done(&self) -> bool {
        self.lock_inner().base.done
    }

    /// Cancel the operation. Idempotent. A queued item completes with
    /// [`TransferError::Cancelled`] immediately; an active transfer also
    /// tells the peer.
    pub fn cancel(&self) {
        let deferred = {
            let mut inner = self.lock_inner();
            let ItemInner { base, task } = &mut *inner;
            if base.done {
                None
            } else {
                task.cancel(&self.ports, base)
            }
        };
        if let Some(call) = deferred {
            call();
        }
    }

    /// Arm subscriptions and the timeout, then send the opening message.
    /// Started at most once; the returned callback delivery must happen
    /// with no locks held.
    fn start(self: &Arc<Self>) -> Option<DeferredCall> {
        let mut inner = self.lock_inner();
        if inner.base.started || inner.base.done {
            return None;
        }
        inner.base.started = true;
        for &message_id in inner.task.message_ids() {
            let id = self.subscribe(message_id);
            inner.base.subscriptions.push(id);
        }
        let duration = (self.ports.timeout_source)();
        let timer = self.ports.timeouts.add(duration, self.timer_callback());
        inner.base.timer = Some(timer);
        let ItemInner { base, task } = &mut *inner;
        task.start(&self.ports, base)
    }

    fn subscribe(self: &Arc<Self>, message_id: u32) -> SubscriptionId {
        let weak = Arc::downgrade(self);
        self.ports.router.subscribe(
            message_id,
            Box::new(move |message| {
                if let Some(item) = weak.upgrade() {
                    item.handle_message(message);
                }
            }),
        )
    }

    fn timer_callback(self: &Arc<Self>) -> TimerCallback {
        let weak = Arc::downgrade(self);
        Box::new(move || {
            if let Some(item) = weak.upgrade() {
                item.handle_timeout();
            }
        })
    }

    fn handle_message(&self, message: &MavMessage) {
        let deferred = {
            let mut inner = self.lock_inner();
            let ItemInner { base, task } = &mut *inner;
            if !base.started || base.done {
                return;
            }
            task.handle_message(&self.ports, base, message)
        };
        if let Some(call) = deferred {
            call();
        }
    }

    fn handle_timeout(&self) {
        let deferred = {
            let mut inner = self.lock_inner();
            let ItemInner { base, task } = &mut *inner;
            if !base.started || base.done {
                return;
            }
            task.handle_timeout(&self.ports, base)
        };
        if let Some(call) = deferred {
            call();
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, ItemInner> {
        self.inner.lock().expect("work item state poisoned")
    }
}

/// Non-owning handle to a queued operation.
///
/// Stays usable while the coordinator holds the item; once the item is
/// popped the handle no longer upgrades and every method is a no-op.
#[derive(Clone, Default)]
pub struct TransferHandle {
    item: Weak<WorkItem>,
}

impl TransferHandle {
    fn new(item: &Arc<WorkItem>) -> Self {
        Self {
            item: Arc::downgrade(item),
        }
    }

    /// Upgrade to the work item if it is still held by the coordinator.
    pub fn work_item(&self) -> Option<Arc<WorkItem>> {
        self.item.upgrade()
    }

    /// Request cancellation; a no-op once the item is gone or done.
    pub fn cancel(&self) {
        if let Some(item) = self.item.upgrade() {
            item.cancel();
        }
    }

    pub fn is_done(&self) -> bool {
        self.item.upgrade().map_or(true, |item| item.is_done())
    }
}

/// Coordinator for mission transfer operations.
///
/// Operations queue FIFO; a periodic [`do_work`](Self::do_work) tick,
/// driven by the owning event loop, starts the head item and discards
/// finished ones. At most one operation talks to the peer at a time.
pub struct MissionTransfer {
    ports: LinkPorts,
    queue: Mutex<VecDeque<Arc<WorkItem>>>,
    int_messages_supported: Arc<AtomicBool>,
}

impl MissionTransfer {
    pub fn new(
        sender: Arc<dyn Sender>,
        router: Arc<dyn MessageRouter>,
        timeouts: Arc<dyn TimeoutScheduler>,
        timeout_source: TimeoutSource,
    ) -> Self {
        Self {
            ports: LinkPorts {
                sender,
                router,
                timeouts,
                timeout_source,
            },
            queue: Mutex::new(VecDeque::new()),
            int_messages_supported: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue an upload of `items` to the peer.
    ///
    /// The list is validated before anything touches the link; rejected
    /// lists fire `callback` synchronously and return a detached handle.
    pub fn upload_items(
        &self,
        mission_type: MavMissionType,
        items: Vec<MissionItemInt>,
        callback: ResultCallback,
        progress: Option<ProgressCallback>,
    ) -> TransferHandle {
        if !self.int_messages_supported.load(Ordering::Relaxed) {
            callback(Err(TransferError::IntMessagesNotSupported));
            return TransferHandle::default();
        }
        if let Err(err) = validate_upload_list(&items, mission_type) {
            callback(Err(err));
            return TransferHandle::default();
        }
        debug!(count = items.len(), ?mission_type, "queueing mission upload");
        self.enqueue(Task::Upload(upload::UploadTask::new(
            mission_type,
            items,
            callback,
            progress,
            Arc::clone(&self.int_messages_supported),
        )))
    }

    /// Queue a client-initiated pull of the peer's mission.
    pub fn download_items(
        &self,
        mission_type: MavMissionType,
        callback: ItemsCallback,
        progress: Option<ProgressCallback>,
    ) -> TransferHandle {
        debug!(?mission_type, "queueing mission download");
        self.enqueue(Task::Download(download::DownloadTask::new(
            mission_type,
            callback,
            progress,
        )))
    }

    /// Queue the server-side ingest of a peer-initiated push whose
    /// `MISSION_COUNT` was already observed by the dispatch layer.
    pub fn receive_incoming_items(
        &self,
        mission_type: MavMissionType,
        mission_count: u32,
        target_component: u8,
        callback: ItemsCallback,
    ) -> TransferHandle {
        debug!(
            ?mission_type,
            mission_count, "queueing incoming mission reception"
        );
        self.enqueue(Task::Receive(receive::ReceiveTask::new(
            mission_type,
            mission_count,
            target_component,
            callback,
        )))
    }

    /// Queue a wipe of the peer's mission of the given type.
    pub fn clear_items(&self, mission_type: MavMissionType, callback: ResultCallback) -> TransferHandle {
        debug!(?mission_type, "queueing mission clear");
        self.enqueue(Task::Clear(clear::ClearTask::new(mission_type, callback)))
    }

    /// Queue selection of the active mission item by sequence index.
    ///
    /// Negative indices fire `callback` synchronously and return a
    /// detached handle, like rejected upload lists.
    pub fn set_current_item(&self, current: i32, callback: ResultCallback) -> TransferHandle {
        if current < 0 {
            callback(Err(TransferError::CurrentInvalid));
            return TransferHandle::default();
        }
        debug!(current, "queueing set-current");
        self.enqueue(Task::SetCurrent(set_current::SetCurrentTask::new(
            current, callback,
        )))
    }

    /// Drive the queue, one action per tick: pop the head item once it
    /// reports done, otherwise start it if it has not run yet. An item
    /// that completes inside its own start is removed on the next tick.
    pub fn do_work(&self) {
        let deferred = {
            let mut queue = self.lock_queue();
            let Some(front) = queue.front().cloned() else {
                return;
            };
            if front.is_done() {
                queue.pop_front();
                None
            } else {
                front.start()
            }
        };
        if let Some(call) = deferred {
            call();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Record whether the peer accepts the INT family of item messages.
    ///
    /// An upload that observes a legacy `MISSION_REQUEST` clears this flag;
    /// it stays false until explicitly set again.
    pub fn set_int_messages_supported(&self, supported: bool) {
        self.int_messages_supported.store(supported, Ordering::Relaxed);
    }

    fn enqueue(&self, task: Task) -> TransferHandle {
        let item = WorkItem::new(self.ports.clone(), task);
        let handle = TransferHandle::new(&item);
        self.lock_queue().push_back(item);
        handle
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Arc<WorkItem>>> {
        self.queue.lock().expect("work queue poisoned")
    }
}

fn validate_upload_list(
    items: &[MissionItemInt],
    mission_type: MavMissionType,
) -> Result<(), TransferError> {
    if items.len() > MAX_ITEM_COUNT {
        return Err(TransferError::TooManyMissionItems);
    }
    let mut currents = 0;
    for (expected, item) in items.iter().enumerate() {
        if item.seq as usize != expected {
            return Err(TransferError::InvalidSequence);
        }
        if item.mission_type != mission_type {
            return Err(TransferError::MissionTypeNotConsistent);
        }
        if item.current != 0 {
            currents += 1;
        }
    }
    if currents > 1 {
        return Err(TransferError::CurrentInvalid);
    }
    Ok(())
}
