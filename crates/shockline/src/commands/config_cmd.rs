//! Config subcommand handlers.

use std::fmt::Write as _;
use std::io::IsTerminal;

use dialoguer::{Input, Password, Select};
use secrecy::SecretString;

use shockline_config::{DEFAULT_BACKEND, store_token};
use shockline_core::CoreError;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    if cfg.token.is_some() {
        cfg.token = Some("****".into());
    }
    cfg
}

/// Format config for display. Expects an already redacted config.
fn format_config(cfg: &Config, token_source: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "backend = \"{}\"", cfg.backend);
    if let Some(ref token) = cfg.token {
        let _ = writeln!(out, "token = \"{token}\"");
    }
    if let Some(ref env) = cfg.token_env {
        let _ = writeln!(out, "token_env = \"{env}\"");
    }
    let _ = writeln!(out, "timeout = {}", cfg.timeout);
    let _ = writeln!(out, "refresh_interval = {}", cfg.refresh_interval);
    let _ = writeln!(out, "presence = {}", cfg.presence);
    let _ = writeln!(out, "insecure = {}", cfg.insecure);
    if let Some(ref ca) = cfg.ca_cert {
        let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
    }
    if let Some(ref level) = cfg.log_level {
        let _ = writeln!(out, "log_level = \"{level}\"");
    }
    let enabled = cfg.shockers.values().filter(|p| p.enabled).count();
    let _ = writeln!(
        out,
        "# {} shockers known, {enabled} enabled",
        cfg.shockers.len()
    );
    let _ = write!(out, "# token source: {token_source}");
    out
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn require_terminal(command: &str) -> Result<(), CliError> {
    if std::io::stdin().is_terminal() {
        return Ok(());
    }
    Err(CliError::Validation {
        field: "interactive".into(),
        reason: format!("'{command}' needs a terminal; pass values as arguments instead"),
    })
}

fn prompt_token() -> Result<String, CliError> {
    let token = Password::new()
        .with_prompt("API token")
        .interact()
        .map_err(prompt_err)?;
    if token.trim().is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }
    Ok(token.trim().to_owned())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str, expected: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: key.into(),
        reason: format!("must be {expected}"),
    })
}

fn set_value(cfg: &mut Config, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "backend" => {
            cfg.backend = value;
            cfg.backend_url()?;
        }
        "token_env" | "token-env" => cfg.token_env = Some(value),
        "timeout" => cfg.timeout = parse_value(key, &value, "a number (seconds)")?,
        "refresh_interval" | "refresh-interval" => {
            cfg.refresh_interval = parse_value(key, &value, "a number (seconds, 0 disables)")?;
        }
        "presence" => cfg.presence = parse_value(key, &value, "'true' or 'false'")?,
        "insecure" => cfg.insecure = parse_value(key, &value, "'true' or 'false'")?,
        "ca_cert" | "ca-cert" => cfg.ca_cert = Some(value.into()),
        "log_level" | "log-level" => cfg.log_level = Some(value),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: backend, token_env, timeout, \
                     refresh_interval, presence, insecure, ca_cert, log_level"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init { no_verify } => {
            require_terminal("config init")?;
            let config_path = config::config_path();
            eprintln!("shockline configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let backend: String = Input::new()
                .with_prompt("Backend URL")
                .default(
                    global
                        .backend
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BACKEND.into()),
                )
                .interact_text()
                .map_err(prompt_err)?;

            let token = prompt_token()?;

            let mut cfg = Config {
                backend,
                ..Config::default()
            };
            if let Some(timeout) = global.timeout {
                cfg.timeout = timeout;
            }

            if !no_verify {
                let engine_cfg = cfg.to_engine_config(SecretString::from(token.clone()))?;
                let me = engine_cfg
                    .api_client()?
                    .self_info()
                    .await
                    .map_err(CoreError::from)?;
                eprintln!("   ✓ Authenticated as {}", me.name);
            }

            let choices = &[
                "Store in system keyring (recommended)",
                "Save to config file (plaintext)",
            ];
            let selection = Select::new()
                .with_prompt("Where to store the token?")
                .items(choices)
                .default(0)
                .interact()
                .map_err(prompt_err)?;
            if selection == 0 {
                store_token(&token)?;
                eprintln!("   ✓ Token stored in system keyring");
            } else {
                cfg.token = Some(token);
            }

            let path = config::save_config(&cfg)?;
            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("\n  Try it: shockline status");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let source = if global.token.is_some() {
                "command line".to_owned()
            } else {
                cfg.resolve_token()
                    .map_or_else(|_| "none".to_owned(), |t| t.source.to_string())
            };
            let view = redacted(&cfg);
            let out = output::render_single(
                global.output,
                &view,
                |c| format_config(c, &source),
                |c| c.backend.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config()?;
            set_value(&mut cfg, &key, value)?;
            let path = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Set {key} in {}", path.display());
            }
            Ok(())
        }

        // ── Set-token ───────────────────────────────────────────────
        ConfigCommand::SetToken { token } => {
            let token = match token {
                Some(token) if !token.trim().is_empty() => token.trim().to_owned(),
                Some(_) => {
                    return Err(CliError::Validation {
                        field: "token".into(),
                        reason: "token cannot be empty".into(),
                    });
                }
                None => {
                    require_terminal("config set-token")?;
                    prompt_token()?
                }
            };
            store_token(&token)?;
            if !global.quiet {
                eprintln!("✓ Token stored in system keyring");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_value_parses_typed_keys() {
        let mut cfg = Config::default();
        set_value(&mut cfg, "refresh-interval", "0".into()).unwrap();
        set_value(&mut cfg, "presence", "false".into()).unwrap();
        set_value(&mut cfg, "log_level", "debug".into()).unwrap();
        assert_eq!(cfg.refresh_interval, 0);
        assert!(!cfg.presence);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn set_value_rejects_bad_input() {
        let mut cfg = Config::default();
        assert!(set_value(&mut cfg, "timeout", "soon".into()).is_err());
        assert!(set_value(&mut cfg, "backend", "not a url".into()).is_err());
        assert!(set_value(&mut cfg, "colour", "red".into()).is_err());
    }

    #[test]
    fn show_masks_the_token() {
        let cfg = Config {
            token: Some("very-secret".into()),
            ..Config::default()
        };
        let text = format_config(&redacted(&cfg), "config file");
        assert!(text.contains("token = \"****\""));
        assert!(!text.contains("very-secret"));
    }
}
