//! Fake ports for driving the transfer state machines deterministically:
//! a recording sender, a subscription router delivered by hand, and a
//! timeout scheduler whose timers fire on demand.

#![allow(dead_code)]

use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MavMissionType, MISSION_ACK_DATA,
    MISSION_COUNT_DATA, MISSION_CURRENT_DATA, MISSION_REQUEST_DATA, MISSION_REQUEST_INT_DATA,
};
use mavlink::Message;
use mavmission::{
    Autopilot, ItemsCallback, MessageCallback, MessageRouter, MissionItemInt, MissionTransfer,
    ProgressCallback, ResultCallback, Sender, SubscriptionId, TimeoutScheduler, TimerCallback,
    TimerId, TransferError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PEER_SYSTEM: u8 = 1;
pub const OWN_SYSTEM: u8 = 245;
pub const OWN_COMPONENT: u8 = 190;

// ---------------------------------------------------------------------------
// Fake ports
// ---------------------------------------------------------------------------

pub struct RecordingSender {
    sent: Mutex<Vec<MavMessage>>,
    fail_sends: AtomicBool,
    autopilot: Autopilot,
}

impl RecordingSender {
    pub fn new(autopilot: Autopilot) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            autopilot,
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn take_sent(&self) -> Vec<MavMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Sender for RecordingSender {
    fn send_message(&self, message: &MavMessage) -> bool {
        if self.fail_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message.clone());
        true
    }

    fn own_system_id(&self) -> u8 {
        OWN_SYSTEM
    }

    fn own_component_id(&self) -> u8 {
        OWN_COMPONENT
    }

    fn target_system_id(&self) -> u8 {
        PEER_SYSTEM
    }

    fn autopilot(&self) -> Autopilot {
        self.autopilot
    }
}

struct Route {
    id: SubscriptionId,
    message_id: u32,
    callback: Arc<Mutex<MessageCallback>>,
    removed: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct FakeRouter {
    routes: Mutex<Vec<Route>>,
    next_id: AtomicU64,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a message to every live subscription for its id, without
    /// holding the registry lock during delivery.
    pub fn deliver(&self, message: &MavMessage) {
        let message_id = message.message_id();
        let matching: Vec<_> = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .filter(|route| route.message_id == message_id)
            .map(|route| (Arc::clone(&route.callback), Arc::clone(&route.removed)))
            .collect();
        for (callback, removed) in matching {
            if removed.load(Ordering::SeqCst) {
                continue;
            }
            (callback.lock().unwrap())(message);
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }
}

impl MessageRouter for FakeRouter {
    fn subscribe(&self, message_id: u32, callback: MessageCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.routes.lock().unwrap().push(Route {
            id,
            message_id,
            callback: Arc::new(Mutex::new(callback)),
            removed: Arc::new(AtomicBool::new(false)),
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter().find(|route| route.id == id) {
            route.removed.store(true, Ordering::SeqCst);
        }
        routes.retain(|route| route.id != id);
    }
}

struct FakeTimer {
    id: TimerId,
    armed: Arc<AtomicBool>,
    callback: Arc<Mutex<TimerCallback>>,
}

#[derive(Default)]
pub struct FakeTimeouts {
    timers: Mutex<Vec<FakeTimer>>,
    next_id: AtomicU64,
}

impl FakeTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every armed timer once, as if its deadline passed.
    pub fn expire(&self) {
        let armed: Vec<_> = self
            .timers
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| timer.armed.load(Ordering::SeqCst))
            .map(|timer| (Arc::clone(&timer.armed), Arc::clone(&timer.callback)))
            .collect();
        for (flag, callback) in armed {
            if flag.swap(false, Ordering::SeqCst) {
                (callback.lock().unwrap())();
            }
        }
    }

    pub fn timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl TimeoutScheduler for FakeTimeouts {
    fn add(&self, _duration: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.timers.lock().unwrap().push(FakeTimer {
            id,
            armed: Arc::new(AtomicBool::new(true)),
            callback: Arc::new(Mutex::new(callback)),
        });
        id
    }

    fn refresh(&self, id: TimerId) {
        let timers = self.timers.lock().unwrap();
        if let Some(timer) = timers.iter().find(|timer| timer.id == id) {
            timer.armed.store(true, Ordering::SeqCst);
        }
    }

    fn remove(&self, id: TimerId) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(timer) = timers.iter().find(|timer| timer.id == id) {
            timer.armed.store(false, Ordering::SeqCst);
        }
        timers.retain(|timer| timer.id != id);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub sender: Arc<RecordingSender>,
    pub router: Arc<FakeRouter>,
    pub timeouts: Arc<FakeTimeouts>,
    pub transfer: MissionTransfer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_autopilot(Autopilot::Px4)
    }

    pub fn with_autopilot(autopilot: Autopilot) -> Self {
        let sender = Arc::new(RecordingSender::new(autopilot));
        let router = Arc::new(FakeRouter::new());
        let timeouts = Arc::new(FakeTimeouts::new());
        let transfer = MissionTransfer::new(
            sender.clone(),
            router.clone(),
            timeouts.clone(),
            Arc::new(|| Duration::from_millis(500)),
        );
        Self {
            sender,
            router,
            timeouts,
            transfer,
        }
    }

    pub fn deliver(&self, message: MavMessage) {
        self.router.deliver(&message);
    }

    pub fn sent(&self) -> Vec<MavMessage> {
        self.sender.take_sent()
    }

    /// True once every subscription and timer has been released.
    pub fn resources_released(&self) -> bool {
        self.router.subscription_count() == 0 && self.timeouts.timer_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Callback capture
// ---------------------------------------------------------------------------

pub type CapturedResults = Arc<Mutex<Vec<Result<(), TransferError>>>>;
pub type CapturedItems = Arc<Mutex<Vec<Result<Vec<MissionItemInt>, TransferError>>>>;
pub type CapturedProgress = Arc<Mutex<Vec<f32>>>;

pub fn capture_result() -> (ResultCallback, CapturedResults) {
    let slot: CapturedResults = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&slot);
    (
        Box::new(move |result| writer.lock().unwrap().push(result)),
        slot,
    )
}

pub fn capture_items() -> (ItemsCallback, CapturedItems) {
    let slot: CapturedItems = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&slot);
    (
        Box::new(move |result| writer.lock().unwrap().push(result)),
        slot,
    )
}

pub fn capture_progress() -> (ProgressCallback, CapturedProgress) {
    let slot: CapturedProgress = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&slot);
    (
        Arc::new(move |value| writer.lock().unwrap().push(value)),
        slot,
    )
}

// ---------------------------------------------------------------------------
// Item and message builders
// ---------------------------------------------------------------------------

pub fn waypoint(seq: u16, mission_type: MavMissionType) -> MissionItemInt {
    MissionItemInt {
        seq,
        frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
        command: MavCmd::MAV_CMD_NAV_WAYPOINT,
        current: u8::from(seq == 0),
        autocontinue: 1,
        param1: 0.0,
        param2: 2.0,
        param3: 0.0,
        param4: 0.0,
        x: 473_977_420 + i32::from(seq),
        y: 85_455_970 + i32::from(seq),
        z: 25.0 + f32::from(seq),
        mission_type,
    }
}

pub fn mission_items(count: u16, mission_type: MavMissionType) -> Vec<MissionItemInt> {
    (0..count).map(|seq| waypoint(seq, mission_type)).collect()
}

pub fn request_int(seq: u16, mission_type: MavMissionType) -> MavMessage {
    MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
        seq,
        target_system: OWN_SYSTEM,
        target_component: OWN_COMPONENT,
        mission_type,
    })
}

pub fn request_legacy(seq: u16, mission_type: MavMissionType) -> MavMessage {
    MavMessage::MISSION_REQUEST(MISSION_REQUEST_DATA {
        seq,
        target_system: OWN_SYSTEM,
        target_component: OWN_COMPONENT,
        mission_type,
    })
}

pub fn ack(status: MavMissionResult, mission_type: MavMissionType) -> MavMessage {
    MavMessage::MISSION_ACK(MISSION_ACK_DATA {
        target_system: OWN_SYSTEM,
        target_component: OWN_COMPONENT,
        mavtype: status,
        mission_type,
        opaque_id: 0,
    })
}

pub fn mission_count(count: u16, mission_type: MavMissionType) -> MavMessage {
    MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
        count,
        target_system: OWN_SYSTEM,
        target_component: OWN_COMPONENT,
        mission_type,
        opaque_id: 0,
    })
}

pub fn item_int(item: &MissionItemInt) -> MavMessage {
    MavMessage::MISSION_ITEM_INT(item.to_wire(OWN_SYSTEM, OWN_COMPONENT))
}

pub fn mission_current(seq: u16) -> MavMessage {
    MavMessage::MISSION_CURRENT(MISSION_CURRENT_DATA {
        seq,
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Assertions on recorded traffic
// ---------------------------------------------------------------------------

pub fn sent_item_seqs(messages: &[MavMessage]) -> Vec<u16> {
    messages
        .iter()
        .filter_map(|message| match message {
            MavMessage::MISSION_ITEM_INT(data) => Some(data.seq),
            _ => None,
        })
        .collect()
}

pub fn sent_request_seqs(messages: &[MavMessage]) -> Vec<u16> {
    messages
        .iter()
        .filter_map(|message| match message {
            MavMessage::MISSION_REQUEST_INT(data) => Some(data.seq),
            _ => None,
        })
        .collect()
}

pub fn count_messages(messages: &[MavMessage]) -> Vec<u16> {
    messages
        .iter()
        .filter_map(|message| match message {
            MavMessage::MISSION_COUNT(data) => Some(data.count),
            _ => None,
        })
        .collect()
}

pub fn ack_statuses(messages: &[MavMessage]) -> Vec<MavMissionResult> {
    messages
        .iter()
        .filter_map(|message| match message {
            MavMessage::MISSION_ACK(data) => Some(data.mavtype),
            _ => None,
        })
        .collect()
}
