// ── Backend adapters ──
//
// Implements the engine's collaborator traits on top of shockline-api:
// the REST roster, the user hub as presence channel, and live-control
// sockets as connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::SecretString;
use shockline_api::hub::{HubHandle, hub_url};
use shockline_api::live::{CLOSE_GRACE, LiveEvent, live_url, run_live_session};
use shockline_api::{ApiClient, ReconnectConfig};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::convert::presence_event;
use crate::engine::{ConnectionEvents, Engine};
use crate::error::CoreError;
use crate::model::{ConnectionState, Device, DeviceId, PresenceEvent};
use crate::source::{
    ConnectionFactory, GatewayResolution, LiveConnection, PresenceChannel, RosterSource,
};

const PRESENCE_CHANNEL_SIZE: usize = 64;

/// The engine wired to the real backend.
pub type LiveEngine = Engine<ApiRoster, LiveFactory>;

/// Build an engine that talks to the backend described by `config`.
/// Presence is separate: see [`HubPresence::connect`].
pub fn build_engine(config: &EngineConfig) -> Result<LiveEngine, CoreError> {
    let client = config.api_client()?;
    let roster = ApiRoster::new(client.clone());
    let factory = LiveFactory::new(client, config.token.clone(), config.reconnect.clone());
    Ok(Engine::new(roster, factory, config.options()))
}

// ── Roster ───────────────────────────────────────────────────────────

pub struct ApiRoster {
    client: ApiClient,
}

impl ApiRoster {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

impl RosterSource for ApiRoster {
    async fn fetch_devices(&self) -> Result<Vec<Device>, CoreError> {
        let devices = self.client.own_devices().await?;
        Ok(devices.into_iter().map(Device::from).collect())
    }
}

// ── Presence ─────────────────────────────────────────────────────────

/// Presence channel backed by the user hub.
pub struct HubPresence {
    hub: HubHandle,
    tx: broadcast::Sender<PresenceEvent>,
}

impl HubPresence {
    /// Start the hub connection and a task that forwards its pushes as
    /// [`PresenceEvent`]s. Both stop when `cancel` fires.
    pub fn connect(config: &EngineConfig, cancel: CancellationToken) -> Result<Self, CoreError> {
        let url = hub_url(&config.backend)?;
        let hub = HubHandle::connect(
            url,
            config.token.clone(),
            config.reconnect.clone(),
            cancel.clone(),
        );

        let (tx, _) = broadcast::channel(PRESENCE_CHANNEL_SIZE);
        let mut hub_rx = hub.subscribe();
        let forward = tx.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = hub_rx.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if let Some(presence) = presence_event(&event) {
                            let _ = forward.send(presence);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "hub forwarder lagged");
                        let _ = forward.send(PresenceEvent::Resynced);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("hub forwarder stopped");
        });

        Ok(Self { hub, tx })
    }

    pub fn shutdown(&self) {
        self.hub.shutdown();
    }
}

impl PresenceChannel for HubPresence {
    fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.tx.subscribe()
    }
}

// ── Connection factory ───────────────────────────────────────────────

pub struct LiveFactory {
    client: ApiClient,
    token: SecretString,
    reconnect: ReconnectConfig,
}

impl LiveFactory {
    pub fn new(client: ApiClient, token: SecretString, reconnect: ReconnectConfig) -> Self {
        Self {
            client,
            token,
            reconnect,
        }
    }
}

impl ConnectionFactory for LiveFactory {
    type Connection = LiveSocketConnection;

    async fn resolve_gateway(&self, device: DeviceId) -> Result<GatewayResolution, CoreError> {
        use shockline_api::Error as Api;

        match self.client.device_gateway(device.as_uuid()).await {
            Ok(lcg) => {
                debug!(%device, gateway = %lcg.gateway, country = ?lcg.country, "resolved gateway");
                Ok(GatewayResolution::Gateway(lcg.gateway))
            }
            Err(Api::NotFound { .. }) => Ok(GatewayResolution::NotFound),
            Err(Api::DeviceOffline) => Ok(GatewayResolution::DeviceOffline),
            Err(Api::DeviceNotConnectedToGateway) => Ok(GatewayResolution::OnlineNoGateway),
            Err(e) if e.is_unauthenticated() => Ok(GatewayResolution::Unauthenticated),
            Err(e) => Err(e.into()),
        }
    }

    fn create(
        &self,
        gateway: &str,
        device: DeviceId,
        events: ConnectionEvents,
    ) -> Result<LiveSocketConnection, CoreError> {
        let url = live_url(gateway, device.as_uuid())?;
        Ok(LiveSocketConnection::new(
            url,
            self.token.clone(),
            self.reconnect.clone(),
            events,
        ))
    }
}

// ── Live socket connection ───────────────────────────────────────────

/// A live-control socket wearing the [`LiveConnection`] interface.
pub struct LiveSocketConnection {
    url: Url,
    token: SecretString,
    reconnect: ReconnectConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    device: DeviceId,
    events: ConnectionEvents,
    state: Mutex<ConnectionState>,
    disposed: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            self.events.state_changed(next);
        }
    }

    /// Move to `Disposed` and report it. Only the first caller wins.
    fn finish(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.transition(ConnectionState::Disposed);
        self.events.disposed();
        true
    }
}

impl LiveSocketConnection {
    pub fn new(
        url: Url,
        token: SecretString,
        reconnect: ReconnectConfig,
        events: ConnectionEvents,
    ) -> Self {
        Self {
            url,
            token,
            reconnect,
            shared: Arc::new(Shared {
                device: events.device(),
                events,
                state: Mutex::new(ConnectionState::Connecting),
                disposed: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl LiveConnection for LiveSocketConnection {
    fn device(&self) -> DeviceId {
        self.shared.device
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn start(&self) -> Result<(), CoreError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(CoreError::Internal(format!(
                "live connection for {} already disposed",
                self.shared.device
            )));
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_live_session(
            self.url.clone(),
            self.token.clone(),
            self.reconnect.clone(),
            tx,
            self.cancel.clone(),
        ));
        *task = Some(tokio::spawn(relay_events(
            Arc::clone(&self.shared),
            rx,
            self.cancel.clone(),
        )));

        debug!(device = %self.shared.device, url = %self.url, "live session spawned");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), CoreError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.cancel.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                warn!(device = %self.shared.device, "live session did not close in time");
            }
        }

        if self.shared.finish() {
            debug!(device = %self.shared.device, "live connection disposed");
        }
        Ok(())
    }
}

/// Forward socket lifecycle into the connection's event sink until the
/// session ends.
async fn relay_events(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<LiveEvent>,
    cancel: CancellationToken,
) {
    while let Some(event) = rx.recv().await {
        match event {
            LiveEvent::State(state) => shared.transition(state.into()),
            LiveEvent::DeviceNotConnected => {
                info!(device = %shared.device, "gateway reports the device is gone");
                shared.events.device_unreachable();
            }
            LiveEvent::Latency(ms) => trace!(device = %shared.device, latency_ms = ms, "gateway latency"),
        }
    }

    // The session gave up on its own: retry budget spent or device gone.
    if !cancel.is_cancelled() && shared.finish() {
        debug!(device = %shared.device, "live session ended, connection disposed itself");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::{ConnectionEvent, ConnectionEventKind};
    use uuid::Uuid;

    fn connection(
        max_retries: Option<u32>,
    ) -> (LiveSocketConnection, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let device = DeviceId::new(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        let events = ConnectionEvents::new(device, 1, tx);
        let url = live_url("ws://127.0.0.1:1", device.as_uuid()).unwrap();
        let reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            max_retries,
        };
        let conn = LiveSocketConnection::new(url, SecretString::from("t".to_owned()), reconnect, events);
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_silences_the_sink() {
        let (conn, mut rx) = connection(None);
        conn.start().await.unwrap();

        conn.dispose().await.unwrap();
        conn.dispose().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disposed);

        let kinds = drain(&mut rx);
        let disposed = kinds
            .iter()
            .filter(|k| **k == ConnectionEventKind::Disposed)
            .count();
        assert_eq!(disposed, 1);
        assert_eq!(kinds.last(), Some(&ConnectionEventKind::Disposed));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn start_after_dispose_is_rejected() {
        let (conn, _rx) = connection(None);
        conn.dispose().await.unwrap();
        assert!(conn.start().await.is_err());
    }

    #[tokio::test]
    async fn exhausted_session_disposes_itself() {
        let (conn, mut rx) = connection(Some(1));
        conn.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while tokio::time::Instant::now() < deadline {
            seen.extend(drain(&mut rx));
            if seen.contains(&ConnectionEventKind::Disposed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(seen.contains(&ConnectionEventKind::Disposed));
        assert_eq!(conn.state(), ConnectionState::Disposed);
        // Disposing afterwards changes nothing.
        conn.dispose().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
