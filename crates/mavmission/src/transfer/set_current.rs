use super::{BaseState, DeferredCall, LinkPorts, ResultCallback, AUTOPILOT_COMPONENT, RETRY_BUDGET};
use crate::error::TransferError;
use mavlink::common::{MavMessage, MISSION_CURRENT_DATA, MISSION_SET_CURRENT_DATA};
use mavlink::MessageData;
use tracing::{debug, trace, warn};

pub(crate) const MESSAGE_IDS: &[u32] = &[MISSION_CURRENT_DATA::ID];

/// Single set/confirm exchange selecting the active mission item.
///
/// The peer confirms by broadcasting `MISSION_CURRENT` with the requested
/// sequence; any other sequence just means the change has not landed yet.
pub(crate) struct SetCurrentTask {
    current: i32,
    callback: Option<ResultCallback>,
    retries_done: u32,
}

impl SetCurrentTask {
    pub(crate) fn new(current: i32, callback: ResultCallback) -> Self {
        Self {
            current,
            callback: Some(callback),
            retries_done: 0,
        }
    }

    pub(crate) fn start(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.send_set_current(ports, base)
    }

    pub(crate) fn handle_message(
        &mut self,
        ports: &LinkPorts,
        base: &mut BaseState,
        message: &MavMessage,
    ) -> Option<DeferredCall> {
        match message {
            MavMessage::MISSION_CURRENT(current) => {
                if i32::from(current.seq) == self.current {
                    self.finish(ports, base, Ok(()))
                } else {
                    trace!(seq = current.seq, "current item not yet updated");
                    None
                }
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
            warn!("set-current ran out of retries");
            return self.finish(ports, base, Err(TransferError::Timeout));
        }
        self.retries_done += 1;
        debug!(retry = self.retries_done, "resending MISSION_SET_CURRENT");
        self.send_set_current(ports, base)
    }

    pub(crate) fn cancel(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        self.finish(ports, base, Err(TransferError::Cancelled))
    }

    fn send_set_current(&mut self, ports: &LinkPorts, base: &mut BaseState) -> Option<DeferredCall> {
        let message = MavMessage::MISSION_SET_CURRENT(MISSION_SET_CURRENT_DATA {
            target_system: ports.sender.target_system_id(),
            target_component: AUTOPILOT_COMPONENT,
            seq: self.current as u16,
        });
        if !ports.sender.send_message(&message) {
            warn!("sending MISSION_SET_CURRENT failed");
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
