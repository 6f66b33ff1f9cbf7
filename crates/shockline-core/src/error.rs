// ── Core error types ──
//
// Errors surfaced by shockline-core. Consumers never see HTTP status codes
// or JSON parse failures directly: the `From<shockline_api::Error>` impl
// folds transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Backend rejected the API token")]
    Unauthenticated,

    // ── Connectivity ─────────────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Engine has been shut down")]
    ShutDown,

    /// A registry invariant was about to be broken. Aborts the operation.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if the backend refused our credentials.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<shockline_api::Error> for CoreError {
    fn from(err: shockline_api::Error) -> Self {
        use shockline_api::Error as Api;

        match err {
            Api::Unauthenticated | Api::InvalidToken(_) => CoreError::Unauthenticated,
            Api::NotFound { resource } => CoreError::NotFound { resource },
            Api::DeviceOffline => CoreError::Api {
                message: "device is offline".into(),
                status: Some(412),
            },
            Api::DeviceNotConnectedToGateway => CoreError::Api {
                message: "device is online but not connected to a gateway".into(),
                status: Some(412),
            },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            Api::Protocol(message) => CoreError::Internal(format!("Protocol error: {message}")),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_errors_become_unauthenticated() {
        assert!(CoreError::from(shockline_api::Error::Unauthenticated).is_unauthenticated());
        assert!(
            CoreError::from(shockline_api::Error::InvalidToken("bad".into())).is_unauthenticated()
        );
        assert!(!CoreError::from(shockline_api::Error::DeviceOffline).is_unauthenticated());
    }

    #[test]
    fn api_status_is_kept() {
        let err = CoreError::from(shockline_api::Error::Api {
            status: 500,
            message: "boom".into(),
        });
        assert!(matches!(err, CoreError::Api { status: Some(500), .. }));
    }
}
