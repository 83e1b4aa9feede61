use super::{
    mission_ack_message, BaseState, DeferredCall, ItemsCallback, LinkPorts, ProgressCallback,
    AUTOPILOT_COMPONENT, RETRY_BUDGET,
};
use crate::error::TransferError;
use crate::item::MissionItemInt;
use mavlink::common::{
    MavMessage, MavMissionResult, MavMissionType, MISSION_ACK_DATA, MISSION_COUNT_DATA,
    MISSION_ITEM_INT_DATA, MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA,
};
use mavlink::MessageData;
use tracing::{debug, trace, warn};

pub(crate) const MESSAGE_IDS: &[u32] = &[
    MISSION_COUNT_DATA::ID,
    MISSION_ITEM_INT_DATA::ID,
    MISSION_ACK_DATA::ID,
];

#[derive(PartialEq)]
enum Step {
    RequestList,
    RequestItem,
}

/// Request-list-then-request-items state machine pulling the peer's mission.
///
/// Asks for the count, then requests items one at a time in sequence order,
/// acking the transfer once the last item has arrived.
pub(crate) struct DownloadTask {
    mission_type: MavMissionType,
    items: Vec<MissionItemInt>,
    callback: Option<ItemsCallback>,
    progress: Option<ProgressCallback>,
    step: Step,
    next_sequence: usize,
    expected_count: usize,
    retries_done: u32,
}

impl DownloadTask {
    pub(crate) fn new(
        mission_type: MavMissionType,
        callback: ItemsCallback,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            mission_type,
            items: Vec::new(),
            callback: Some(callback),
            progress,
            step: Step::RequestList,
            next_sequence: 0,
            expected_count: 0,
            retries_done: 0,
        }
    }

    pub(crate) fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.send_request_list(ports, base)
    }

    pub(crate) fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match message {
            MavMessage::MISSION_COUNT(count) if count.mission_type == self.mission_type => {
                self.handle_count(ports, base, count.count)
            }
            MavMessage::MISSION_ITEM_INT(item) if item.mission_type == self.mission_type => {
                self.handle_item(ports, base, item)
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
            warn!("mission download ran out of retries");
            return self.finish_err(ports, base, TransferError::Timeout);
        }
        self.retries_done += 1;
        match self.step {
            Step::RequestList => {
                debug!(retry = self.retries_done, "resending MISSION_REQUEST_LIST");
                self.send_request_list(ports, base)
            }
            Step::RequestItem => {
                debug!(
                    retry = self.retries_done,
                    seq = self.next_sequence,
                    "re-requesting mission item"
                );
                self.request_item(ports, base)
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
        self.finish_err(ports, base, TransferError::Cancelled)
    }

    fn send_request_list(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
            target_system: ports.sender.target_system_id(),
            target_component: AUTOPILOT_COMPONENT,
            mission_type: self.mission_type,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_REQUEST_LIST failed");
            return self.finish_err(ports, base, TransferError::ConnectionError);
        }
        base.refresh_timer(ports);
        None
    }

    fn request_item(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq: self.next_sequence as u16,
            target_system: ports.sender.target_system_id(),
            target_component: AUTOPILOT_COMPONENT,
            mission_type: self.mission_type,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_REQUEST_INT failed");
            return self.finish_err(ports, base, TransferError::ConnectionError);
        }
        base.refresh_timer(ports);
        None
    }

    fn handle_count(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        count: u16,
    ) -> Option<DeferredCall> {
        if self.step != Step::RequestList {
            trace!(count, "ignoring repeated MISSION_COUNT");
            return None;
        }
        debug!(count, "mission count received");
        self.expected_count = count as usize;
        self.step = Step::RequestItem;
        self.retries_done = 0;
        if self.expected_count == 0 {
            self.send_ack_and_finish(ports, base)
        } else {
            self.request_item(ports, base)
        }
    }

    fn handle_item(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        data: &MISSION_ITEM_INT_DATA,
    ) -> Option<DeferredCall> {
        if self.step != Step::RequestItem {
            return None;
        }
        if data.seq as usize != self.next_sequence {
            // Duplicate or stale delivery; neither the timer nor the retry
            // counter is touched.
            trace!(
                seq = data.seq,
                expected = self.next_sequence,
                "discarding out-of-order mission item"
            );
            return None;
        }
        self.items.push(MissionItemInt::from_wire(data));
        self.next_sequence += 1;
        self.retries_done = 0;
        self.update_progress(self.items.len() as f32 / self.expected_count as f32);
        if self.next_sequence == self.expected_count {
            self.send_ack_and_finish(ports, base)
        } else {
            self.request_item(ports, base)
        }
    }

    fn handle_ack(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        status: MavMissionResult,
    ) -> Option<DeferredCall> {
        match TransferError::from_ack(status) {
            Ok(()) => {
                warn!("unexpected MISSION_ACK while downloading");
                self.finish_err(ports, base, TransferError::ProtocolError)
            }
            Err(err) => self.finish_err(ports, base, err),
        }
    }

    fn send_ack_and_finish(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = mission_ack_message(
            ports,
            AUTOPILOT_COMPONENT,
            MavMissionResult::MAV_MISSION_ACCEPTED,
            self.mission_type,
        );
        if !ports.sender.send_message(&message) {
            warn!("sending final MISSION_ACK failed");
            return self.finish_err(ports, base, TransferError::ConnectionError);
        }
        if self.expected_count == 0 {
            self.update_progress(1.0);
        }
        let items = std::mem::take(&mut self.items);
        self.finish(ports, base, Ok(items))
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
        result: Result<Vec<MissionItemInt>, TransferError>,
    ) -> Option<DeferredCall> {
        base.conclude(ports);
        let callback = self.callback.take()?;
        Some(Box::new(move || callback(result)))
    }

    fn finish_err(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        err: TransferError,
    ) -> Option<DeferredCall> {
        self.finish(ports, base, Err(err))
    }
}
