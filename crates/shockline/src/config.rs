//! CLI configuration: thin wrapper around `shockline_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--backend, --token, --timeout).

use secrecy::SecretString;
use tracing::debug;

use shockline_core::EngineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use shockline_config::{Config, config_path, load_config, save_config};

/// Load the config file and apply flag overrides.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = load_config()?;
    if let Some(ref backend) = global.backend {
        cfg.backend.clone_from(backend);
    }
    if let Some(timeout) = global.timeout {
        cfg.timeout = timeout;
    }
    Ok(cfg)
}

/// Resolve the token (flag first, then the config chain) and build the
/// engine configuration.
pub fn engine_config(cfg: &Config, global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let token = match global.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            debug!("using token from command line");
            SecretString::from(token.to_owned())
        }
        None => {
            let resolved = cfg.resolve_token()?;
            debug!(source = %resolved.source, "resolved token");
            resolved.secret
        }
    };
    Ok(cfg.to_engine_config(token)?)
}
