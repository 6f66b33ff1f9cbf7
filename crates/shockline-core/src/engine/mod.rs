// ── Reconciliation engine ──
//
// Keeps one live connection per reachable roster device. Presence pushes,
// roster change notices and a periodic timer all funnel into
// `request_refresh`; passes are single-flight and coalesce. Connection
// lifecycle events come back through one mpsc channel drained by the event
// pump, and every change is re-broadcast as a `Change`.

mod events;
mod gate;
mod registry;

pub use events::ConnectionEvents;
pub(crate) use events::{ConnectionEvent, ConnectionEventKind};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use self::gate::Gate;
use self::registry::{Entry, Registry};
use crate::config::EngineOptions;
use crate::error::CoreError;
use crate::model::{
    AuthStatus, Change, ConnectionState, Device, DeviceId, PassReport, PresenceEvent,
    RemovalReason, SkipReason,
};
use crate::source::{ConnectionFactory, GatewayResolution, LiveConnection, RosterSource};

const CHANGE_CHANNEL_SIZE: usize = 256;

/// Immutable view of the registry: device id -> connection state.
pub type ConnectionSnapshot = Arc<BTreeMap<DeviceId, ConnectionState>>;

// ── Engine ───────────────────────────────────────────────────────

/// The live connection reconciliation engine.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Nothing it does is raised to
/// callers as an error; failures end up in logs, in [`PassReport`]s and in
/// [`AuthStatus`].
pub struct Engine<R, F: ConnectionFactory> {
    inner: Arc<EngineInner<R, F>>,
}

impl<R, F: ConnectionFactory> Clone for Engine<R, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<R, F: ConnectionFactory> {
    roster: R,
    factory: F,
    options: EngineOptions,
    registry: Mutex<Registry<F::Connection>>,
    gate: Gate,
    /// Sequence number of the latest refresh request.
    requested: AtomicU64,
    /// Highest request sequence number covered by a finished pass.
    completed: watch::Sender<u64>,
    passes: AtomicU64,
    connections: watch::Sender<ConnectionSnapshot>,
    roster_snapshot: watch::Sender<Arc<Vec<Device>>>,
    auth: watch::Sender<AuthStatus>,
    changes: broadcast::Sender<Change>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    /// Taken by whoever spawns the event pump first.
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    cancel: CancellationToken,
    task_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl<R: RosterSource, F: ConnectionFactory> Engine<R, F> {
    /// Create an engine. Nothing runs until [`start`](Self::start) or a
    /// refresh request.
    pub fn new(roster: R, factory: F, options: EngineOptions) -> Self {
        let (completed, _) = watch::channel(0);
        let (connections, _) = watch::channel(Arc::new(BTreeMap::new()));
        let (roster_snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (auth, _) = watch::channel(AuthStatus::Ok);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(EngineInner {
                roster,
                factory,
                options,
                registry: Mutex::new(Registry::default()),
                gate: Gate::default(),
                requested: AtomicU64::new(0),
                completed,
                passes: AtomicU64::new(0),
                connections,
                roster_snapshot,
                auth,
                changes,
                event_tx,
                event_rx: std::sync::Mutex::new(Some(event_rx)),
                cancel: CancellationToken::new(),
                task_handles: std::sync::Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────

    /// Current connection set. Safe to call while a pass runs; never shows
    /// a half-applied mutation.
    pub fn connections(&self) -> ConnectionSnapshot {
        Arc::clone(&self.inner.connections.borrow())
    }

    pub fn watch_connections(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.connections.subscribe()
    }

    /// Subscribe to the aggregated change signal.
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.inner.changes.subscribe()
    }

    /// The change signal as a `Stream`.
    pub fn change_stream(&self) -> BroadcastStream<Change> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn auth_status(&self) -> AuthStatus {
        *self.inner.auth.borrow()
    }

    pub fn watch_auth(&self) -> watch::Receiver<AuthStatus> {
        self.inner.auth.subscribe()
    }

    /// Roster observed by the most recent successful fetch.
    pub fn roster(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.inner.roster_snapshot.borrow())
    }

    /// Whether a pass is running right now.
    pub fn pass_in_flight(&self) -> bool {
        self.inner.gate.is_running()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Triggers ─────────────────────────────────────────────────

    /// Schedule a pass and return immediately.
    ///
    /// While a pass runs, any number of calls collapse into one trailing
    /// pass. Returns the request's sequence number.
    pub fn request_refresh(&self) -> u64 {
        if self.inner.cancel.is_cancelled() {
            debug!("refresh requested after shutdown, ignoring");
            return self.inner.requested.load(Ordering::SeqCst);
        }

        self.spawn_event_pump();
        let seq = self.inner.requested.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.gate.try_enter() {
            let engine = self.clone();
            tokio::spawn(engine.run_passes());
        } else {
            debug!(seq, "pass in flight, coalescing refresh request");
        }
        seq
    }

    /// Request a pass and wait until one that started after this call has
    /// finished. Returns early if the engine shuts down.
    pub async fn refresh(&self) {
        let mut completed = self.inner.completed.subscribe();
        let seq = self.request_refresh();
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {}
            _ = completed.wait_for(|done| *done >= seq) => {}
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the event pump and trigger listeners, then request the first
    /// pass.
    pub fn start(
        &self,
        presence: Option<broadcast::Receiver<PresenceEvent>>,
    ) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }
        self.spawn_event_pump();

        let cancel = &self.inner.cancel;
        let mut handles = self.task_handles();

        if let Some(presence) = presence {
            handles.push(tokio::spawn(presence_task(
                self.clone(),
                presence,
                cancel.clone(),
            )));
        }

        if let Some(changes) = self.inner.roster.changes() {
            handles.push(tokio::spawn(roster_change_task(
                self.clone(),
                changes,
                cancel.clone(),
            )));
        }

        if let Some(period) = self.inner.options.refresh_interval.filter(|p| !p.is_zero()) {
            handles.push(tokio::spawn(refresh_task(
                self.clone(),
                period,
                cancel.clone(),
            )));
        }
        drop(handles);

        info!("engine started");
        self.request_refresh();
        Ok(())
    }

    /// Stop all triggers, wait for the in-flight pass, then dispose every
    /// live connection concurrently. Repeated calls are no-ops.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");
        self.inner.cancel.cancel();

        // Passes and the event pump hold the registry lock for their whole
        // critical section, so taking it here waits them out.
        let entries = {
            let mut registry = self.inner.registry.lock().await;
            let entries = registry.drain();
            self.publish(&registry);
            entries
        };

        let disposed = join_all(entries.into_iter().map(|(device, entry)| async move {
            Self::dispose_entry(device, entry).await;
            device
        }))
        .await;

        for device in &disposed {
            self.emit(Change::Removed {
                device: *device,
                reason: RemovalReason::Shutdown,
            });
        }

        let handles: Vec<_> = self.task_handles().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        info!(disposed = disposed.len(), "engine shut down");
    }

    // ── Reconciliation ───────────────────────────────────────────

    async fn run_passes(self) {
        loop {
            let covered = self.inner.requested.load(Ordering::SeqCst);
            let report = self.run_pass().await;
            self.finish_pass(report, covered);

            if self.inner.cancel.is_cancelled() {
                self.inner.gate.stop();
                break;
            }
            if !self.inner.gate.finish() {
                break;
            }
            debug!("running coalesced pass");
        }
    }

    async fn run_pass(&self) -> PassReport {
        let pass = self.inner.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = PassReport::new(pass);
        let mut registry = self.inner.registry.lock().await;

        if self.inner.cancel.is_cancelled() {
            report.abort("engine shut down");
            return report;
        }

        debug!(pass, "reconciliation pass started");
        let Some(devices) = self.fetch_roster(&mut report).await else {
            return report;
        };

        let wanted: BTreeSet<DeviceId> = devices.iter().map(|d| d.id).collect();
        self.remove_stale(&mut registry, &wanted, &mut report).await;
        let auth_rejected = self.add_missing(&mut registry, &devices, &mut report).await;

        report.auth_degraded = auth_rejected;
        self.set_auth(if auth_rejected {
            AuthStatus::Degraded
        } else {
            AuthStatus::Ok
        });
        self.publish(&registry);
        report
    }

    /// Fetch the roster. On failure the pass is aborted and the registry is
    /// left untouched.
    async fn fetch_roster(&self, report: &mut PassReport) -> Option<Arc<Vec<Device>>> {
        match self.inner.roster.fetch_devices().await {
            Ok(devices) => {
                let devices = Arc::new(devices);
                self.inner.roster_snapshot.send_replace(Arc::clone(&devices));
                Some(devices)
            }
            Err(e) => {
                if e.is_unauthenticated() {
                    error!(pass = report.pass, "roster fetch rejected, the API token is invalid or expired");
                    self.set_auth(AuthStatus::Degraded);
                    report.auth_degraded = true;
                } else {
                    warn!(pass = report.pass, error = %e, "roster fetch failed, keeping current connections");
                }
                report.abort(format!("roster fetch failed: {e}"));
                None
            }
        }
    }

    async fn remove_stale(
        &self,
        registry: &mut Registry<F::Connection>,
        wanted: &BTreeSet<DeviceId>,
        report: &mut PassReport,
    ) {
        for device in registry.ids() {
            if wanted.contains(&device) {
                continue;
            }
            let Some(entry) = registry.remove(&device) else {
                continue;
            };
            self.publish(registry);
            info!(%device, generation = entry.generation, "device left the roster, disposing connection");
            Self::dispose_entry(device, entry).await;
            report.removed.push(device);
            self.emit(Change::Removed {
                device,
                reason: RemovalReason::LeftRoster,
            });
        }
    }

    /// Connect every roster device that has no entry yet. Returns `true` if
    /// any gateway lookup was rejected as unauthenticated.
    async fn add_missing(
        &self,
        registry: &mut Registry<F::Connection>,
        devices: &[Device],
        report: &mut PassReport,
    ) -> bool {
        let mut auth_rejected = false;

        for device in devices {
            let id = device.id;
            if registry.contains(&id) {
                continue;
            }
            if !device.online_capable {
                debug!(device = %id, name = %device.name, "device cannot go online, skipping");
                report.skip(id, SkipReason::NotOnlineCapable);
                continue;
            }

            let gateway = match self.inner.factory.resolve_gateway(id).await {
                Ok(GatewayResolution::Gateway(gateway)) => gateway,
                Ok(GatewayResolution::NotFound) => {
                    error!(device = %id, name = %device.name, "device not found while resolving its gateway");
                    report.skip(id, SkipReason::NotFound);
                    continue;
                }
                Ok(GatewayResolution::DeviceOffline) => {
                    info!(device = %id, name = %device.name, "device is offline, skipping");
                    report.skip(id, SkipReason::DeviceOffline);
                    continue;
                }
                Ok(GatewayResolution::OnlineNoGateway) => {
                    error!(
                        device = %id,
                        name = %device.name,
                        "device is online but not connected to a live-control gateway, update its firmware"
                    );
                    report.skip(id, SkipReason::OnlineNoGateway);
                    continue;
                }
                Ok(GatewayResolution::Unauthenticated) => {
                    error!(device = %id, "gateway lookup rejected, the API token is invalid or expired");
                    auth_rejected = true;
                    report.skip(id, SkipReason::Unauthenticated);
                    continue;
                }
                Err(e) => {
                    warn!(device = %id, error = %e, "gateway lookup failed, retrying on next pass");
                    report.skip(id, SkipReason::ResolveFailed);
                    continue;
                }
            };

            match self.connect(registry, device, &gateway).await {
                Ok(None) => report.added.push(id),
                Ok(Some(reason)) => report.skip(id, reason),
                Err(e) => {
                    error!(device = %id, error = %e, "aborting reconciliation pass");
                    report.abort(e.to_string());
                    break;
                }
            }
        }

        auth_rejected
    }

    /// Create, register and start one connection. `Ok(Some(_))` means the
    /// device was skipped; `Err` is an invariant violation.
    async fn connect(
        &self,
        registry: &mut Registry<F::Connection>,
        device: &Device,
        gateway: &str,
    ) -> Result<Option<SkipReason>, CoreError> {
        let id = device.id;
        let generation = registry.next_generation();
        let events = ConnectionEvents::new(id, generation, self.inner.event_tx.clone());

        let connection = match self.inner.factory.create(gateway, id, events.clone()) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                warn!(device = %id, gateway, error = %e, "could not create connection");
                return Ok(Some(SkipReason::CreateFailed));
            }
        };

        let entry = Entry {
            generation,
            connection: Arc::clone(&connection),
            events: events.clone(),
            state: connection.state(),
        };
        if let Err(e) = registry.insert(id, entry) {
            events.close();
            if let Err(dispose_err) = connection.dispose().await {
                warn!(device = %id, error = %dispose_err, "dispose of rejected connection failed");
            }
            return Err(e);
        }
        self.publish(registry);
        debug!(device = %id, generation, gateway, "connection registered");

        if let Err(e) = connection.start().await {
            warn!(device = %id, error = %e, "connection failed to start, retrying on next pass");
            if let Some(entry) = registry.remove_generation(&id, generation) {
                self.publish(registry);
                Self::dispose_entry(id, entry).await;
            }
            return Ok(Some(SkipReason::StartFailed));
        }

        info!(device = %id, name = %device.name, gateway, generation, "live connection started");
        Ok(None)
    }

    fn finish_pass(&self, report: PassReport, covered: u64) {
        info!(
            pass = report.pass,
            completed = report.is_completed(),
            added = report.added.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            "reconciliation pass finished"
        );
        self.emit(Change::Reconciled(report));
        self.inner.completed.send_if_modified(|done| {
            if covered > *done {
                *done = covered;
                true
            } else {
                false
            }
        });
    }

    // ── Connection events ────────────────────────────────────────

    async fn handle_event(&self, event: ConnectionEvent) {
        let ConnectionEvent {
            device,
            generation,
            kind,
        } = event;

        match kind {
            ConnectionEventKind::StateChanged(state) => {
                let mut registry = self.inner.registry.lock().await;
                if !registry.set_state(&device, generation, state) {
                    trace!(%device, generation, %state, "ignoring stale or redundant state change");
                    return;
                }
                self.publish(&registry);
                drop(registry);
                debug!(%device, %state, "connection state changed");
                self.emit(Change::StateChanged { device, state });
            }
            ConnectionEventKind::DeviceUnreachable => {
                let mut registry = self.inner.registry.lock().await;
                let Some(entry) = registry.remove_generation(&device, generation) else {
                    debug!(%device, generation, "ignoring unreachable report from a retired connection");
                    return;
                };
                self.publish(&registry);
                info!(%device, generation, "device unreachable, disposing connection");
                Self::dispose_entry(device, entry).await;
                drop(registry);
                self.emit(Change::Removed {
                    device,
                    reason: RemovalReason::Unreachable,
                });
            }
            ConnectionEventKind::Disposed => {
                let mut registry = self.inner.registry.lock().await;
                let Some(entry) = registry.remove_generation(&device, generation) else {
                    trace!(%device, generation, "retired connection reported disposal");
                    return;
                };
                entry.events.close();
                self.publish(&registry);
                drop(registry);
                info!(%device, generation, "connection disposed itself");
                self.emit(Change::Removed {
                    device,
                    reason: RemovalReason::Disposed,
                });
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Spawn the event pump unless it already runs. Passes may be requested
    /// without `start`, and their connections still need their events
    /// applied.
    fn spawn_event_pump(&self) {
        let Some(event_rx) = self
            .inner
            .event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let pump = tokio::spawn(event_pump(
            self.clone(),
            event_rx,
            self.inner.cancel.clone(),
        ));
        self.task_handles().push(pump);
        debug!("event pump spawned");
    }

    fn task_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .task_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispose_entry(device: DeviceId, entry: Entry<F::Connection>) {
        entry.events.close();
        if let Err(e) = entry.connection.dispose().await {
            warn!(%device, generation = entry.generation, error = %e, "dispose failed, dropping connection anyway");
        }
    }

    fn publish(&self, registry: &Registry<F::Connection>) {
        self.inner
            .connections
            .send_replace(Arc::new(registry.snapshot()));
    }

    fn emit(&self, change: Change) {
        // No receivers is fine.
        let _ = self.inner.changes.send(change);
    }

    fn set_auth(&self, status: AuthStatus) {
        self.inner.auth.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                info!(%status, "auth status changed");
                *current = status;
                true
            }
        });
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn event_pump<R: RosterSource, F: ConnectionFactory>(
    engine: Engine<R, F>,
    mut rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                engine.handle_event(event).await;
            }
        }
    }
}

async fn presence_task<R: RosterSource, F: ConnectionFactory>(
    engine: Engine<R, F>,
    mut presence: broadcast::Receiver<PresenceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = presence.recv() => event,
        };

        match event {
            Ok(PresenceEvent::Resynced) => debug!("presence channel resynced"),
            Ok(PresenceEvent::DeviceStatus(states)) => {
                for state in &states {
                    debug!(device = %state.device, online = state.online, "device presence changed");
                }
            }
            Ok(PresenceEvent::DeviceUpdated { device, kind }) => {
                debug!(%device, %kind, "device updated");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "presence listener lagged");
            }
            Err(RecvError::Closed) => {
                debug!("presence channel closed");
                break;
            }
        }
        engine.request_refresh();
    }
}

async fn roster_change_task<R: RosterSource, F: ConnectionFactory>(
    engine: Engine<R, F>,
    mut changes: broadcast::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = changes.recv() => event,
        };
        if matches!(event, Err(RecvError::Closed)) {
            break;
        }
        debug!("roster source reported a change");
        engine.request_refresh();
    }
}

/// Periodically request a pass.
async fn refresh_task<R: RosterSource, F: ConnectionFactory>(
    engine: Engine<R, F>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                debug!("periodic reconciliation");
                engine.request_refresh();
            }
        }
    }
}
