// ── API-to-domain type conversions ──
//
// Bridges shockline-api wire types into the domain model. Each `From` impl
// normalizes field names and fills defaults the wire format leaves out.

use shockline_api::hub::{DeviceOnlineState, DeviceUpdateType, HubEvent};
use shockline_api::live::LiveState;
use shockline_api::models::{DeviceWithShockers, ShockerResponse};

use crate::model::{
    ConnectionState, Device, DeviceId, DevicePresence, DeviceUpdateKind, PresenceEvent, Shocker,
};

// ── Roster ───────────────────────────────────────────────────────────

impl From<ShockerResponse> for Shocker {
    fn from(s: ShockerResponse) -> Self {
        Shocker {
            id: s.id,
            name: s.name,
            model: s.model,
            rf_id: s.rf_id,
            is_paused: s.is_paused,
        }
    }
}

impl From<DeviceWithShockers> for Device {
    fn from(d: DeviceWithShockers) -> Self {
        Device {
            id: DeviceId::new(d.id),
            name: d.name,
            // The roster endpoint lists only hubs that can take a live
            // connection; reachability is decided by the gateway lookup.
            online_capable: true,
            shockers: d.shockers.into_iter().map(Shocker::from).collect(),
        }
    }
}

// ── Presence ─────────────────────────────────────────────────────────

impl From<DeviceOnlineState> for DevicePresence {
    fn from(s: DeviceOnlineState) -> Self {
        DevicePresence {
            device: DeviceId::new(s.device),
            online: s.online,
            firmware_version: s.firmware_version,
        }
    }
}

impl From<DeviceUpdateType> for DeviceUpdateKind {
    fn from(t: DeviceUpdateType) -> Self {
        match t {
            DeviceUpdateType::Created => Self::Created,
            DeviceUpdateType::Updated => Self::Updated,
            DeviceUpdateType::ShockerUpdated => Self::ShockerUpdated,
            DeviceUpdateType::Deleted => Self::Deleted,
        }
    }
}

/// Translate a hub push into a presence event. `Welcome` carries nothing
/// the engine needs.
pub(crate) fn presence_event(event: &HubEvent) -> Option<PresenceEvent> {
    match event {
        HubEvent::Connected => Some(PresenceEvent::Resynced),
        HubEvent::Welcome { .. } => None,
        HubEvent::DeviceStatus(states) => Some(PresenceEvent::DeviceStatus(
            states.iter().cloned().map(DevicePresence::from).collect(),
        )),
        HubEvent::DeviceUpdate { device, kind } => Some(PresenceEvent::DeviceUpdated {
            device: DeviceId::new(*device),
            kind: (*kind).into(),
        }),
    }
}

// ── Live socket ──────────────────────────────────────────────────────

impl From<LiveState> for ConnectionState {
    fn from(state: LiveState) -> Self {
        match state {
            LiveState::Connecting => Self::Connecting,
            LiveState::Connected => Self::Connected,
            LiveState::Reconnecting { attempt } => Self::Reconnecting { attempt },
            LiveState::Disconnected => Self::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn device_with_shockers_converts() {
        let hub = Uuid::new_v4();
        let shocker = Uuid::new_v4();
        let wire = DeviceWithShockers {
            id: hub,
            name: "Hub".into(),
            created_on: None,
            shockers: vec![ShockerResponse {
                id: shocker,
                name: "Left".into(),
                is_paused: true,
                created_on: None,
                rf_id: 9,
                model: "Petrainer".into(),
            }],
        };

        let device = Device::from(wire);
        assert_eq!(device.id, DeviceId::new(hub));
        assert!(device.online_capable);
        assert_eq!(
            device.shockers,
            vec![Shocker {
                id: shocker,
                name: "Left".into(),
                model: "Petrainer".into(),
                rf_id: 9,
                is_paused: true,
            }]
        );
    }

    #[test]
    fn hub_events_map_to_presence() {
        let device = Uuid::new_v4();
        assert_eq!(presence_event(&HubEvent::Connected), Some(PresenceEvent::Resynced));
        assert_eq!(
            presence_event(&HubEvent::Welcome {
                connection_id: "abc".into()
            }),
            None
        );
        assert_eq!(
            presence_event(&HubEvent::DeviceUpdate {
                device,
                kind: DeviceUpdateType::Deleted
            }),
            Some(PresenceEvent::DeviceUpdated {
                device: DeviceId::new(device),
                kind: DeviceUpdateKind::Deleted
            })
        );
    }

    #[test]
    fn live_states_map() {
        assert_eq!(
            ConnectionState::from(LiveState::Reconnecting { attempt: 2 }),
            ConnectionState::Reconnecting { attempt: 2 }
        );
        assert_eq!(
            ConnectionState::from(LiveState::Disconnected),
            ConnectionState::Disconnected
        );
    }
}
