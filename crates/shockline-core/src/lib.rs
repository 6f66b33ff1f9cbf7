// shockline-core: Live connection reconciliation between the OpenShock roster and per-device sockets.

pub mod backend;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod model;
pub mod source;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{ApiRoster, HubPresence, LiveEngine, LiveFactory, LiveSocketConnection, build_engine};
pub use config::{EngineConfig, EngineOptions};
pub use engine::{ConnectionEvents, ConnectionSnapshot, Engine};
pub use error::CoreError;
pub use source::{ConnectionFactory, GatewayResolution, LiveConnection, PresenceChannel, RosterSource};

pub use shockline_api::{ReconnectConfig, TlsMode};

pub use model::{
    AuthStatus, Change, ConnectionState, Device, DeviceId, DevicePresence, DeviceUpdateKind,
    PassOutcome, PassReport, PresenceEvent, RemovalReason, Shocker, SkipReason, SkippedDevice,
};
