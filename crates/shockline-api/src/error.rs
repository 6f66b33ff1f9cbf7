use thiserror::Error;

/// Top-level error type for the `shockline-api` crate.
///
/// Covers every failure mode across the API surfaces: authentication,
/// transport, the REST endpoints, the user hub, and live-control sockets.
/// `shockline-core` maps these into engine-level outcomes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected the session token (HTTP 401/403).
    #[error("Not authenticated with the backend -- the API token is missing, expired, or revoked")]
    Unauthenticated,

    // ── Resource state ──────────────────────────────────────────────
    /// Resource does not exist, or the token has no permission to see it.
    #[error("Not found or no permission: {resource}")]
    NotFound { resource: String },

    /// Device exists but is not currently online.
    #[error("Device is offline")]
    DeviceOffline,

    /// Device is online but not attached to a live-control gateway.
    /// In practice this means the device firmware is too old for live control.
    #[error("Device is online but not connected to a live-control gateway")]
    DeviceNotConnectedToGateway,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Token cannot be sent as a header value.
    #[error("Invalid API token: {0}")]
    InvalidToken(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Unexpected status from the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The hub or gateway spoke something we could not follow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if re-authenticating might resolve this error.
    pub fn is_unauthenticated(&self) -> bool {
        match self {
            Self::Unauthenticated => true,
            Self::Transport(e) => matches!(
                e.status(),
                Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::DeviceOffline => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
