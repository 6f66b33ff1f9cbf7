// ── Presence notifications ──
//
// Pushed by the presence channel. The engine treats every one of them as
// a reason to reconcile; the payload is only logged.

use serde::{Deserialize, Serialize};

use super::device::DeviceId;

/// Online state of one device as reported by the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePresence {
    pub device: DeviceId,
    pub online: bool,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceUpdateKind {
    Created,
    Updated,
    ShockerUpdated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The channel (re)connected; anything pushed while it was down is lost.
    Resynced,
    DeviceStatus(Vec<DevicePresence>),
    DeviceUpdated {
        device: DeviceId,
        kind: DeviceUpdateKind,
    },
}
