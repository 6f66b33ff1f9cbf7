// ── Connection lifecycle and engine signal types ──

use std::fmt;

use serde::Serialize;

use super::device::DeviceId;

/// Lifecycle state of one live-control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
    Disposed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Disposed => f.write_str("disposed"),
        }
    }
}

/// Whether the backend currently accepts our credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Ok,
    /// At least one request in the latest pass was rejected as unauthenticated.
    Degraded,
}

/// Why a connection left the registry outside of (or during) a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemovalReason {
    /// The device is no longer in the roster.
    LeftRoster,
    /// The connection reported the device as unreachable.
    Unreachable,
    /// The connection disposed itself.
    Disposed,
    /// The engine is shutting down.
    Shutdown,
}

/// Why a roster device was left without a connection in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    NotOnlineCapable,
    NotFound,
    DeviceOffline,
    OnlineNoGateway,
    Unauthenticated,
    ResolveFailed,
    CreateFailed,
    StartFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkippedDevice {
    pub device: DeviceId,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PassOutcome {
    Completed,
    /// The pass stopped before touching the registry, or stopped midway on
    /// an invariant violation.
    Aborted { reason: String },
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Monotonic pass number, starting at 1.
    pub pass: u64,
    pub outcome: PassOutcome,
    pub added: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
    pub skipped: Vec<SkippedDevice>,
    pub auth_degraded: bool,
}

impl PassReport {
    pub(crate) fn new(pass: u64) -> Self {
        Self {
            pass,
            outcome: PassOutcome::Completed,
            added: Vec::new(),
            removed: Vec::new(),
            skipped: Vec::new(),
            auth_degraded: false,
        }
    }

    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        self.outcome = PassOutcome::Aborted {
            reason: reason.into(),
        };
    }

    pub(crate) fn skip(&mut self, device: DeviceId, reason: SkipReason) {
        self.skipped.push(SkippedDevice { device, reason });
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, PassOutcome::Completed)
    }
}

/// The aggregated "world changed" signal.
///
/// Consumers re-read [`Engine::connections`](crate::Engine::connections)
/// when they see one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum Change {
    /// A pass finished (completed or aborted). Exactly one per pass.
    Reconciled(PassReport),
    StateChanged {
        device: DeviceId,
        state: ConnectionState,
    },
    Removed {
        device: DeviceId,
        reason: RemovalReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (attempt 3)"
        );
        assert_eq!(AuthStatus::Degraded.to_string(), "degraded");
        assert_eq!(SkipReason::OnlineNoGateway.to_string(), "online_no_gateway");
    }

    #[test]
    fn report_abort_marks_outcome() {
        let mut report = PassReport::new(1);
        assert!(report.is_completed());
        report.abort("roster unavailable");
        assert!(!report.is_completed());
    }
}
