use super::{
    mission_ack_message, BaseState, DeferredCall, ItemsCallback, LinkPorts, RETRY_BUDGET,
};
use crate::error::TransferError;
use crate::item::MissionItemInt;
use mavlink::common::{
    MavMessage, MavMissionResult, MavMissionType, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA,
    MISSION_REQUEST_INT_DATA,
};
use mavlink::MessageData;
use tracing::{debug, trace, warn};

pub(crate) const MESSAGE_IDS: &[u32] = &[MISSION_COUNT_DATA::ID, MISSION_ITEM_INT_DATA::ID];

/// Server-side ingest of a peer-initiated mission push.
///
/// The dispatch layer already saw the peer's `MISSION_COUNT`, so the
/// exchange starts straight at the first item request, addressed to the
/// component that announced the mission.
pub(crate) struct ReceiveTask {
    mission_type: MavMissionType,
    target_component: u8,
    items: Vec<MissionItemInt>,
    callback: Option<ItemsCallback>,
    next_sequence: usize,
    expected_count: usize,
    retries_done: u32,
}

impl ReceiveTask {
    pub(crate) fn new(
        mission_type: MavMissionType,
        mission_count: u32,
        target_component: u8,
        callback: ItemsCallback,
    ) -> Self {
        Self {
            mission_type,
            target_component,
            items: Vec::new(),
            callback: Some(callback),
            next_sequence: 0,
            expected_count: mission_count as usize,
            retries_done: 0,
        }
    }

    pub(crate) fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        if self.expected_count == 0 {
            return self.send_ack_and_finish(ports, base);
        }
        self.request_item(ports, base)
    }

    pub(crate) fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match message {
            MavMessage::MISSION_COUNT(count) if count.mission_type == self.mission_type => {
                self.handle_count(ports, base)
            }
            MavMessage::MISSION_ITEM_INT(item) if item.mission_type == self.mission_type => {
                self.handle_item(ports, base, item)
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
            warn!("incoming mission reception ran out of retries");
            return self.finish_err(ports, base, TransferError::Timeout);
        }
        self.retries_done += 1;
        debug!(
            retry = self.retries_done,
            seq = self.next_sequence,
            "re-requesting incoming mission item"
        );
        self.request_item(ports, base)
    }

    pub(crate) fn cancel(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        if base.started {
            let message = mission_ack_message(
                ports,
                self.target_component,
                MavMissionResult::MAV_MISSION_OPERATION_CANCELLED,
                self.mission_type,
            );
            let _ = ports.sender.send_message(&message);
        }
        self.finish_err(ports, base, TransferError::Cancelled)
    }

    fn request_item(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq: self.next_sequence as u16,
            target_system: ports.sender.target_system_id(),
            target_component: self.target_component,
            mission_type: self.mission_type,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_REQUEST_INT failed");
            return self.finish_err(ports, base, TransferError::ConnectionError);
        }
        base.refresh_timer(ports);
        None
    }

    fn handle_count(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        // The peer re-announced its count, so our first request was lost.
        if self.next_sequence == 0 {
            debug!("count re-announced; re-requesting first item");
            return self.request_item(ports, base);
        }
        trace!("ignoring repeated MISSION_COUNT mid-transfer");
        None
    }

    fn handle_item(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        data: &MISSION_ITEM_INT_DATA,
    ) -> Option<DeferredCall> {
        if data.seq as usize != self.next_sequence {
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
        if self.next_sequence == self.expected_count {
            self.send_ack_and_finish(ports, base)
        } else {
            self.request_item(ports, base)
        }
    }

    fn send_ack_and_finish(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = mission_ack_message(
            ports,
            self.target_component,
            MavMissionResult::MAV_MISSION_ACCEPTED,
            self.mission_type,
        );
        if !ports.sender.send_message(&message) {
            warn!("sending final MISSION_ACK failed");
            return self.finish_err(ports, base, TransferError::ConnectionError);
        }
        let items = std::mem::take(&mut self.items);
        self.finish(ports, base, Ok(items))
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
