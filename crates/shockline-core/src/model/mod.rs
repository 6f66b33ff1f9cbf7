// ── Domain model ──
//
// Types the engine and its consumers share. Wire types stay in
// shockline-api; `crate::convert` translates between the two.

pub mod connection;
pub mod device;
pub mod presence;

pub use connection::{
    AuthStatus, Change, ConnectionState, PassOutcome, PassReport, RemovalReason, SkipReason,
    SkippedDevice,
};
pub use device::{Device, DeviceId, Shocker};
pub use presence::{DevicePresence, DeviceUpdateKind, PresenceEvent};
