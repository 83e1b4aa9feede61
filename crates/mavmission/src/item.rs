use mavlink::common::{MavCmd, MavFrame, MavMissionType, MISSION_ITEM_INT_DATA};
use serde::{Deserialize, Serialize};

/// Wire-level mission item as carried by `MISSION_ITEM_INT`.
///
/// Field-for-field mirror of the message payload minus addressing, so a
/// download followed by an upload reproduces the exact wire content. For
/// global frames `x` and `y` are scaled degrees (1e7), `z` is altitude in
/// meters. Equality is structural across every field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MissionItemInt {
    pub seq: u16,
    pub frame: MavFrame,
    pub command: MavCmd,
    pub current: u8,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub mission_type: MavMissionType,
}

impl MissionItemInt {
    pub fn from_wire(data: &MISSION_ITEM_INT_DATA) -> Self {
        Self {
            seq: data.seq,
            frame: data.frame,
            command: data.command,
            current: data.current,
            autocontinue: data.autocontinue,
            param1: data.param1,
            param2: data.param2,
            param3: data.param3,
            param4: data.param4,
            x: data.x,
            y: data.y,
            z: data.z,
            mission_type: data.mission_type,
        }
    }

    pub fn to_wire(&self, target_system: u8, target_component: u8) -> MISSION_ITEM_INT_DATA {
        MISSION_ITEM_INT_DATA {
            param1: self.param1,
            param2: self.param2,
            param3: self.param3,
            param4: self.param4,
            x: self.x,
            y: self.y,
            z: self.z,
            seq: self.seq,
            command: self.command,
            target_system,
            target_component,
            frame: self.frame,
            current: self.current,
            autocontinue: self.autocontinue,
            mission_type: self.mission_type,
        }
    }
}
