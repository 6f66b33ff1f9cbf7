//! Shared configuration for the shockline host.
//!
//! TOML file + `SHOCKLINE_` environment layering, token resolution
//! (env + plaintext + keyring), per-shocker preferences kept in sync with
//! the roster, and translation to `shockline_core::EngineConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use shockline_core::{Device, EngineConfig, TlsMode};

/// Keyring service name the token is stored under.
pub const KEYRING_SERVICE: &str = "shockline";
const KEYRING_USER: &str = "token";

/// Environment variable consulted for the token when `token_env` is unset
/// or empty.
pub const TOKEN_ENV: &str = "SHOCKLINE_TOKEN";

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "SHOCKLINE_CONFIG";

pub const DEFAULT_BACKEND: &str = "https://api.openshock.app";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no API token configured")]
    NoToken,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// REST base URL of the OpenShock backend.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// API token (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable name containing the API token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between periodic reconciliation passes. 0 disables them.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Subscribe to the user hub for presence pushes.
    #[serde(default = "default_presence")]
    pub presence: bool,

    /// Accept invalid TLS certificates (self-hosted backends).
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Default tracing filter for `shockline run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Per-shocker preferences, keyed by shocker id.
    #[serde(default)]
    pub shockers: BTreeMap<Uuid, ShockerPreference>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            token: None,
            token_env: None,
            timeout: default_timeout(),
            refresh_interval: default_refresh_interval(),
            presence: default_presence(),
            insecure: false,
            ca_cert: None,
            log_level: None,
            shockers: BTreeMap::new(),
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND.into()
}
fn default_timeout() -> u64 {
    30
}
fn default_refresh_interval() -> u64 {
    300
}
fn default_presence() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShockerPreference {
    #[serde(default = "default_presence")]
    pub enabled: bool,

    /// Display name at the last sync, for humans reading the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Uuid>,
}

/// What [`Config::sync_shockers`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShockerSync {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Where a resolved token came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// The variable named by `token_env`.
    ConfiguredEnv(String),
    /// `SHOCKLINE_TOKEN`.
    DefaultEnv,
    Plaintext,
    Keyring,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfiguredEnv(name) => write!(f, "env ${name}"),
            Self::DefaultEnv => write!(f, "env ${TOKEN_ENV}"),
            Self::Plaintext => f.write_str("config file"),
            Self::Keyring => f.write_str("system keyring"),
        }
    }
}

pub struct ResolvedToken {
    pub secret: SecretString,
    pub source: TokenSource,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `SHOCKLINE_CONFIG`, then the platform
/// config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("app", "openshock", "shockline").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("shockline");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SHOCKLINE_").ignore(&["token", "config"]));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

// ── Keyring ─────────────────────────────────────────────────────────

/// Store the API token in the system keyring.
pub fn store_token(token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?.set_password(token)?;
    Ok(())
}

fn keyring_token() -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .and_then(|entry| entry.get_password())
        .ok()
}

// ── Config behaviour ────────────────────────────────────────────────

impl Config {
    /// Resolve the API token: `token_env` variable, then `SHOCKLINE_TOKEN`,
    /// then plaintext `token`, then the keyring.
    pub fn resolve_token(&self) -> Result<ResolvedToken, ConfigError> {
        self.resolve_token_with(|name| std::env::var(name).ok(), keyring_token)
    }

    fn resolve_token_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
        keyring: impl FnOnce() -> Option<String>,
    ) -> Result<ResolvedToken, ConfigError> {
        let found = |value: String, source: TokenSource| ResolvedToken {
            secret: SecretString::from(value),
            source,
        };

        if let Some(name) = self.token_env.as_deref().filter(|n| !n.is_empty()) {
            if let Some(value) = env(name).filter(|v| !v.is_empty()) {
                return Ok(found(value, TokenSource::ConfiguredEnv(name.to_owned())));
            }
        }
        if let Some(value) = env(TOKEN_ENV).filter(|v| !v.is_empty()) {
            return Ok(found(value, TokenSource::DefaultEnv));
        }
        if let Some(value) = self.token.clone().filter(|v| !v.is_empty()) {
            return Ok(found(value, TokenSource::Plaintext));
        }
        if let Some(value) = keyring().filter(|v| !v.is_empty()) {
            return Ok(found(value, TokenSource::Keyring));
        }
        Err(ConfigError::NoToken)
    }

    /// Rebuild the shocker map from a roster. Existing `enabled` flags are
    /// kept, new shockers start enabled, vanished ones are dropped.
    pub fn sync_shockers(&mut self, devices: &[Device]) -> ShockerSync {
        let mut previous = std::mem::take(&mut self.shockers);
        let mut sync = ShockerSync::default();

        for device in devices {
            for shocker in &device.shockers {
                let enabled = match previous.remove(&shocker.id) {
                    Some(pref) => {
                        sync.kept += 1;
                        pref.enabled
                    }
                    None => {
                        sync.added += 1;
                        true
                    }
                };
                self.shockers.insert(
                    shocker.id,
                    ShockerPreference {
                        enabled,
                        name: Some(shocker.name.clone()),
                        device: Some(*device.id.as_uuid()),
                    },
                );
            }
        }

        sync.removed = previous.len();
        sync
    }

    /// Whether a shocker is enabled. Unknown shockers count as enabled.
    pub fn shocker_enabled(&self, id: &Uuid) -> bool {
        self.shockers.get(id).is_none_or(|pref| pref.enabled)
    }

    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self.backend.parse().map_err(|_| ConfigError::Validation {
            field: "backend".into(),
            reason: format!("invalid URL: {}", self.backend),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "backend".into(),
                reason: format!("expected an http(s) URL, got '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    pub fn tls_mode(&self) -> TlsMode {
        if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        }
    }

    /// Translate into an engine configuration with the given token.
    pub fn to_engine_config(&self, token: SecretString) -> Result<EngineConfig, ConfigError> {
        if self.timeout == 0 {
            return Err(ConfigError::Validation {
                field: "timeout".into(),
                reason: "must be at least 1 second".into(),
            });
        }

        let mut engine = EngineConfig::new(self.backend_url()?, token);
        engine.tls = self.tls_mode();
        engine.timeout = Duration::from_secs(self.timeout);
        engine.refresh_interval =
            (self.refresh_interval > 0).then(|| Duration::from_secs(self.refresh_interval));
        engine.presence = self.presence;
        Ok(engine)
    }
}
