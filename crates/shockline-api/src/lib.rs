// shockline-api: Async Rust client for the OpenShock backend (REST + user hub + live gateways)

pub mod client;
pub mod error;
pub mod hub;
pub mod live;
pub mod models;
pub mod reconnect;
pub mod transport;

pub use client::ApiClient;
pub use error::Error;
pub use hub::{DeviceOnlineState, DeviceUpdateType, HubEvent, HubHandle};
pub use live::{LiveEvent, LiveState};
pub use models::{DeviceWithShockers, LcgResponse, SelfResponse, ShockerResponse};
pub use reconnect::ReconnectConfig;
pub use transport::{TlsMode, TransportConfig};
