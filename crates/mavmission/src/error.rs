use mavlink::common::MavMissionResult;

/// Terminal failure of a mission transfer operation.
///
/// Every work item reports exactly one outcome to its result callback:
/// `Ok` on success or one of these variants. Peer rejections arrive as
/// `MISSION_ACK` status codes and map through [`TransferError::from_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("sending to the link failed")]
    ConnectionError,
    #[error("request denied by the peer")]
    Denied,
    #[error("mission exceeds the supported item count")]
    TooManyMissionItems,
    #[error("no response within the retry budget")]
    Timeout,
    #[error("request not supported by the peer")]
    Unsupported,
    #[error("mission item frame not supported by the peer")]
    UnsupportedFrame,
    #[error("no mission available on the peer")]
    NoMissionAvailable,
    #[error("operation cancelled")]
    Cancelled,
    #[error("mission items have inconsistent mission types")]
    MissionTypeNotConsistent,
    #[error("mission item sequence is invalid")]
    InvalidSequence,
    #[error("current mission item index is invalid")]
    CurrentInvalid,
    #[error("unexpected message or status for the current protocol state")]
    ProtocolError,
    #[error("mission item parameter rejected by the peer")]
    InvalidParam,
    #[error("peer does not support MISSION_ITEM_INT messages")]
    IntMessagesNotSupported,
}

impl TransferError {
    /// Map a `MISSION_ACK` status code to an operation outcome.
    pub fn from_ack(status: MavMissionResult) -> Result<(), TransferError> {
        match status {
            MavMissionResult::MAV_MISSION_ACCEPTED => Ok(()),
            MavMissionResult::MAV_MISSION_ERROR => Err(TransferError::ProtocolError),
            MavMissionResult::MAV_MISSION_UNSUPPORTED_FRAME => {
                Err(TransferError::UnsupportedFrame)
            }
            MavMissionResult::MAV_MISSION_UNSUPPORTED => Err(TransferError::Unsupported),
            MavMissionResult::MAV_MISSION_NO_SPACE => Err(TransferError::TooManyMissionItems),
            MavMissionResult::MAV_MISSION_INVALID
            | MavMissionResult::MAV_MISSION_INVALID_PARAM1
            | MavMissionResult::MAV_MISSION_INVALID_PARAM2
            | MavMissionResult::MAV_MISSION_INVALID_PARAM3
            | MavMissionResult::MAV_MISSION_INVALID_PARAM4
            | MavMissionResult::MAV_MISSION_INVALID_PARAM5_X
            | MavMissionResult::MAV_MISSION_INVALID_PARAM6_Y
            | MavMissionResult::MAV_MISSION_INVALID_PARAM7 => Err(TransferError::InvalidParam),
            MavMissionResult::MAV_MISSION_INVALID_SEQUENCE => Err(TransferError::InvalidSequence),
            MavMissionResult::MAV_MISSION_DENIED => Err(TransferError::Denied),
            MavMissionResult::MAV_MISSION_OPERATION_CANCELLED => Err(TransferError::Cancelled),
        }
    }
}
