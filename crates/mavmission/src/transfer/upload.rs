use super::{
    mission_ack_message, BaseState, DeferredCall, LinkPorts, ProgressCallback, ResultCallback,
    AUTOPILOT_COMPONENT, RETRY_BUDGET,
};
use crate::error::TransferError;
use crate::item::MissionItemInt;
use crate::ports::Autopilot;
use mavlink::common::{
    MavMessage, MavMissionResult, MavMissionType, MISSION_ACK_DATA, MISSION_COUNT_DATA,
    MISSION_REQUEST_DATA, MISSION_REQUEST_INT_DATA,
};
use mavlink::MessageData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) const MESSAGE_IDS: &[u32] = &[
    MISSION_REQUEST_DATA::ID,
    MISSION_REQUEST_INT_DATA::ID,
    MISSION_ACK_DATA::ID,
];

#[derive(PartialEq)]
enum Step {
    SendCount,
    SendItems,
}

/// Count-then-serve-requests state machine pushing a mission to the peer.
///
/// Announces the item count, then answers each `MISSION_REQUEST_INT` with
/// the matching `MISSION_ITEM_INT` until the peer acks the whole list.
pub(crate) struct UploadTask {
    mission_type: MavMissionType,
    items: Vec<MissionItemInt>,
    callback: Option<ResultCallback>,
    progress: Option<ProgressCallback>,
    step: Step,
    next_sequence: usize,
    retries_done: u32,
    int_messages_supported: Arc<AtomicBool>,
}

impl UploadTask {
    pub(crate) fn new(
        mission_type: MavMissionType,
        items: Vec<MissionItemInt>,
        callback: ResultCallback,
        progress: Option<ProgressCallback>,
        int_messages_supported: Arc<AtomicBool>,
    ) -> Self {
        Self {
            mission_type,
            items,
            callback: Some(callback),
            progress,
            step: Step::SendCount,
            next_sequence: 0,
            retries_done: 0,
            int_messages_supported,
        }
    }

    pub(crate) fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.send_count(ports, base)
    }

    pub(crate) fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match message {
            MavMessage::MISSION_REQUEST(request) if request.mission_type == self.mission_type => {
                if ports.sender.autopilot() == Autopilot::ArduPilot {
                    // ArduPilot requests with the legacy message but accepts
                    // MISSION_ITEM_INT replies.
                    self.serve_request(ports, base, request.seq)
                } else {
                    debug!("peer requested legacy mission items");
                    self.int_messages_supported.store(false, Ordering::Relaxed);
                    self.finish(ports, base, Err(TransferError::IntMessagesNotSupported))
                }
            }
            MavMessage::MISSION_REQUEST_INT(request)
                if request.mission_type == self.mission_type =>
            {
                self.serve_request(ports, base, request.seq)
            }
            MavMessage::MISSION_ACK(ack) if ack.mission_type == self.mission_type => {
                self.handle_ack(ports, base, ack.mavtype)
            }
            _ => None,
        }
    }

    pub(crate) fn handle_timeout(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
    ) -> Option<DeferredCall> {
        if self.retries_done >= RETRY_BUDGET {
            warn!("mission upload ran out of retries");
            return self.finish(ports, base, Err(TransferError::Timeout));
        }
        self.retries_done += 1;
        match self.step {
            Step::SendCount => {
                debug!(retry = self.retries_done, "resending MISSION_COUNT");
                self.send_count(ports, base)
            }
            Step::SendItems => {
                let index = self.next_sequence.saturating_sub(1);
                debug!(retry = self.retries_done, seq = index, "resending mission item");
                self.send_item(ports, base, index)
            }
        }
    }

    pub(crate) fn cancel(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        if base.started {
            let message = mission_ack_message(
                ports,
                AUTOPILOT_COMPONENT,
                MavMissionResult::MAV_MISSION_OPERATION_CANCELLED,
                self.mission_type,
            );
            let _ = ports.sender.send_message(&message);
        }
        self.finish(ports, base, Err(TransferError::Cancelled))
    }

    fn send_count(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count: self.items.len() as u16,
            target_system: ports.sender.target_system_id(),
            target_component: AUTOPILOT_COMPONENT,
            mission_type: self.mission_type,
            opaque_id: 0,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_COUNT failed");
            return self.finish(ports, base, Err(TransferError::ConnectionError));
        }
        base.refresh_timer(ports);
        None
    }

    fn serve_request(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        seq: u16,
    ) -> Option<DeferredCall> {
        if self.step == Step::SendCount {
            self.step = Step::SendItems;
            self.retries_done = 0;
        }
        let index = seq as usize;
        if index >= self.items.len() {
            warn!(seq, "mission request outside the announced count");
            return self.finish(ports, base, Err(TransferError::InvalidSequence));
        }
        if index + 1 > self.next_sequence {
            self.next_sequence = index + 1;
            self.retries_done = 0;
        } else {
            // Re-request for an already served item; charge the budget.
            if self.retries_done >= RETRY_BUDGET {
                warn!(seq, "peer kept re-requesting the same mission item");
                return self.finish(ports, base, Err(TransferError::Timeout));
            }
            self.retries_done += 1;
            trace!(seq, "re-serving mission item");
        }
        if let Some(done) = self.send_item(ports, base, index) {
            return Some(done);
        }
        self.update_progress((index + 1) as f32 / self.items.len() as f32);
        None
    }

    fn send_item(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        index: usize,
    ) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_ITEM_INT(
            self.items[index].to_wire(ports.sender.target_system_id(), AUTOPILOT_COMPONENT),
        );
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_ITEM_INT failed");
            return self.finish(ports, base, Err(TransferError::ConnectionError));
        }
        base.refresh_timer(ports);
        None
    }

    fn handle_ack(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        status: MavMissionResult,
    ) -> Option<DeferredCall> {
        let result = match TransferError::from_ack(status) {
            Ok(()) if self.next_sequence == self.items.len() => Ok(()),
            Ok(()) => {
                warn!("mission accepted before all items were served");
                Err(TransferError::ProtocolError)
            }
            Err(err) => Err(err),
        };
        if result.is_ok() && self.items.is_empty() {
            self.update_progress(1.0);
        }
        self.finish(ports, base, result)
    }

    fn update_progress(&self, value: f32) {
        if let Some(progress) = &self.progress {
            progress(value);
        }
    }

    fn finish(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        result: Result<(), TransferError>,
    ) -> Option<DeferredCall> {
        base.conclude(ports);
        let callback = self.callback.take()?;
        Some(Box::new(move || callback(result)))
    }
}
