//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use shockline_config::ConfigError;
use shockline_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {target}")]
    #[diagnostic(
        code(shockline::connection_failed),
        help(
            "Check your network and the backend URL.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Roster unavailable: {reason}")]
    #[diagnostic(
        code(shockline::roster_unavailable),
        help("The backend did not return a device roster. Try again with -v for details.")
    )]
    RosterUnavailable { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("The backend rejected the API token")]
    #[diagnostic(
        code(shockline::auth_failed),
        help(
            "Create a token in the OpenShock web UI, then run:\n\
             shockline config set-token"
        )
    )]
    AuthFailed,

    #[error("No API token configured")]
    #[diagnostic(
        code(shockline::no_token),
        help(
            "Configure one with: shockline config init\n\
             Or set the SHOCKLINE_TOKEN environment variable."
        )
    )]
    NoToken,

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource} not found")]
    #[diagnostic(code(shockline::not_found))]
    NotFound { resource: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(shockline::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(shockline::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(shockline::config),
        help("Inspect the file with: shockline config show")
    )]
    Config(ConfigError),

    #[error("Keyring access failed: {reason}")]
    #[diagnostic(
        code(shockline::keyring),
        help("Use token_env or the SHOCKLINE_TOKEN environment variable instead.")
    )]
    Keyring { reason: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out")]
    #[diagnostic(
        code(shockline::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout,

    #[error("Internal error: {0}")]
    #[diagnostic(code(shockline::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::RosterUnavailable { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed | Self::NoToken | Self::Keyring { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthenticated => CliError::AuthFailed,
            CoreError::ConnectionFailed { target, reason } => {
                CliError::ConnectionFailed { target, reason }
            }
            CoreError::Timeout => CliError::Timeout,
            CoreError::NotFound { resource } => CliError::NotFound { resource },
            CoreError::Api { message, .. } => CliError::ApiError { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other @ (CoreError::AlreadyStarted
            | CoreError::ShutDown
            | CoreError::Invariant(_)
            | CoreError::Internal(_)) => CliError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoToken => CliError::NoToken,
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Keyring(e) => CliError::Keyring {
                reason: e.to_string(),
            },
            other => CliError::Config(other),
        }
    }
}
