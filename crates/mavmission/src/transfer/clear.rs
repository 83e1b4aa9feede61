use super::{BaseState, DeferredCall, LinkPorts, ResultCallback, AUTOPILOT_COMPONENT, RETRY_BUDGET};
use crate::error::TransferError;
use mavlink::common::{MavMessage, MavMissionType, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA};
use mavlink::MessageData;
use tracing::{debug, warn};

pub(crate) const MESSAGE_IDS: &[u32] = &[MISSION_ACK_DATA::ID];

/// Single request/ack exchange wiping the peer's mission of one type.
pub(crate) struct ClearTask {
    mission_type: MavMissionType,
    callback: Option<ResultCallback>,
    retries_done: u32,
}

impl ClearTask {
    pub(crate) fn new(mission_type: MavMissionType, callback: ResultCallback) -> Self {
        Self {
            mission_type,
            callback: Some(callback),
            retries_done: 0,
        }
    }

    pub(crate) fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.send_clear(ports, base)
    }

    pub(crate) fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match message {
            MavMessage::MISSION_ACK(ack) if ack.mission_type == self.mission_type => {
                self.finish(ports, base, TransferError::from_ack(ack.mavtype))
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
            warn!("mission clear ran out of retries");
            return self.finish(ports, base, Err(TransferError::Timeout));
        }
        self.retries_done += 1;
        debug!(retry = self.retries_done, "resending MISSION_CLEAR_ALL");
        self.send_clear(ports, base)
    }

    pub(crate) fn cancel(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.finish(ports, base, Err(TransferError::Cancelled))
    }

    fn send_clear(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: ports.sender.target_system_id(),
            target_component: AUTOPILOT_COMPONENT,
            mission_type: self.mission_type,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_CLEAR_ALL failed");
            return self.finish(ports, base, Err(TransferError::ConnectionError));
        }
        base.refresh_timer(ports);
        None
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
