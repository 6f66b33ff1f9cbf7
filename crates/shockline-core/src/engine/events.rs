// ── Per-connection event sink ──

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::model::{ConnectionState, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEventKind {
    StateChanged(ConnectionState),
    DeviceUnreachable,
    Disposed,
}

/// An event tagged with the generation of the connection that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionEvent {
    pub device: DeviceId,
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

/// Handed to a connection when it is created; the only way it can talk
/// back to the engine.
///
/// Once closed (by the engine on disposal, or by the connection reporting
/// `disposed`) every further call is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    device: DeviceId,
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

impl ConnectionEvents {
    pub(crate) fn new(
        device: DeviceId,
        generation: u64,
        tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            device,
            generation,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(ConnectionEventKind::StateChanged(state));
    }

    pub fn device_unreachable(&self) {
        self.emit(ConnectionEventKind::DeviceUnreachable);
    }

    /// Report disposal. Only the first call goes through; the sink is
    /// closed afterwards.
    pub fn disposed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(ConnectionEventKind::Disposed);
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn emit(&self, kind: ConnectionEventKind) {
        if self.is_closed() {
            tracing::trace!(device = %self.device, generation = self.generation, ?kind, "dropping event from closed sink");
            return;
        }
        self.send(kind);
    }

    fn send(&self, kind: ConnectionEventKind) {
        let _ = self.tx.send(ConnectionEvent {
            device: self.device,
            generation: self.generation,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sink() -> (ConnectionEvents, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionEvents::new(DeviceId::new(Uuid::new_v4()), 7, tx), rx)
    }

    #[test]
    fn events_carry_generation() {
        let (events, mut rx) = sink();
        events.state_changed(ConnectionState::Connected);

        let event = rx.try_recv().expect("event");
        assert_eq!(event.generation, 7);
        assert_eq!(event.kind, ConnectionEventKind::StateChanged(ConnectionState::Connected));
    }

    #[test]
    fn disposed_fires_once_then_drops_everything() {
        let (events, mut rx) = sink();
        events.disposed();
        events.disposed();
        events.device_unreachable();
        events.state_changed(ConnectionState::Connected);

        assert_eq!(rx.try_recv().expect("event").kind, ConnectionEventKind::Disposed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_sink_is_shared_between_clones() {
        let (events, mut rx) = sink();
        let clone = events.clone();
        events.close();

        clone.device_unreachable();
        clone.disposed();
        assert!(clone.is_closed());
        assert!(rx.try_recv().is_err());
    }
}
