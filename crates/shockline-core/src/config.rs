// ── Runtime engine configuration ──
//
// Describes *how* to reach the backend and how often to reconcile. Carries
// the token but never touches disk; shockline-config builds one and hands
// it in.

use std::time::Duration;

use secrecy::SecretString;
use shockline_api::{ApiClient, ReconnectConfig, TlsMode, TransportConfig};
use url::Url;

use crate::error::CoreError;

/// Knobs the engine itself reads.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Run a pass on this period. `None` disables periodic reconciliation.
    pub refresh_interval: Option<Duration>,
}

/// Everything needed to run the engine against a real backend.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// REST base URL, e.g. `https://api.openshock.app`.
    pub backend: Url,
    pub token: SecretString,
    pub tls: TlsMode,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// `None` disables periodic reconciliation.
    pub refresh_interval: Option<Duration>,
    /// Subscribe to the user hub for presence pushes.
    pub presence: bool,
    /// Backoff for the hub and live-control sockets.
    pub reconnect: ReconnectConfig,
}

impl EngineConfig {
    pub fn new(backend: Url, token: SecretString) -> Self {
        Self {
            backend,
            token,
            tls: TlsMode::default(),
            timeout: Duration::from_secs(30),
            refresh_interval: Some(Duration::from_secs(300)),
            presence: true,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
        }
    }

    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            refresh_interval: self.refresh_interval,
        }
    }

    /// Build an authenticated REST client for this backend.
    pub fn api_client(&self) -> Result<ApiClient, CoreError> {
        Ok(ApiClient::new(
            self.backend.clone(),
            &self.token,
            &self.transport(),
        )?)
    }
}
