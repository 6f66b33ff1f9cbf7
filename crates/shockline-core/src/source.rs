// ── Collaborator seams ──
//
// The engine owns none of the I/O. It talks to a roster source, a presence
// channel and a connection factory through these traits; `crate::backend`
// implements them on top of shockline-api, tests implement them with fakes.

use std::future::Future;

use tokio::sync::broadcast;

use crate::engine::ConnectionEvents;
use crate::error::CoreError;
use crate::model::{ConnectionState, Device, DeviceId, PresenceEvent};

/// Supplies the authoritative device roster.
pub trait RosterSource: Send + Sync + 'static {
    /// Fetch the current roster. Authentication failures must come back as
    /// [`CoreError::Unauthenticated`].
    fn fetch_devices(&self) -> impl Future<Output = Result<Vec<Device>, CoreError>> + Send;

    /// Optional "the roster changed" notifications, used only as a trigger.
    fn changes(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// Persistent stream of device presence notifications.
pub trait PresenceChannel: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<PresenceEvent>;
}

/// Outcome of looking up a device's live-control gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResolution {
    Gateway(String),
    NotFound,
    DeviceOffline,
    /// Online, but without a gateway. Usually outdated firmware.
    OnlineNoGateway,
    Unauthenticated,
}

/// Produces live connections for devices.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: LiveConnection;

    /// Resolve the gateway for `device`. `Err` is reserved for transport
    /// failures; every answer the backend gives is a [`GatewayResolution`].
    fn resolve_gateway(
        &self,
        device: DeviceId,
    ) -> impl Future<Output = Result<GatewayResolution, CoreError>> + Send;

    /// Build a connection that reports through `events`. Must not start it.
    fn create(
        &self,
        gateway: &str,
        device: DeviceId,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, CoreError>;
}

/// One long-lived control connection to a device.
///
/// Implementations report every state transition through their
/// [`ConnectionEvents`], call `device_unreachable` once they decide the
/// device is gone, and call `disposed` after disposing.
pub trait LiveConnection: Send + Sync + 'static {
    fn device(&self) -> DeviceId;

    fn state(&self) -> ConnectionState;

    fn start(&self) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Tear the connection down. Repeated calls are no-ops.
    fn dispose(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
}
