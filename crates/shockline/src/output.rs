//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use shockline_core::{AuthStatus, ConnectionState};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

pub fn paint_state(state: ConnectionState, color: bool) -> String {
    let text = state.to_string();
    if !color {
        return text;
    }
    match state {
        ConnectionState::Connected => text.green().to_string(),
        ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {
            text.yellow().to_string()
        }
        ConnectionState::Disconnected | ConnectionState::Disposed => text.red().to_string(),
    }
}

pub fn paint_auth(status: AuthStatus, color: bool) -> String {
    let text = status.to_string();
    match (status, color) {
        (_, false) => text,
        (AuthStatus::Ok, true) => text.green().to_string(),
        (AuthStatus::Degraded, true) => text.red().bold().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views don't use
/// `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

pub(crate) fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub(crate) fn render_json<T: serde::Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.map_err(|e| CliError::Internal(format!("JSON serialization failed: {e}")))
}

fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    serde_yaml::to_string(data)
        .map_err(|e| CliError::Internal(format!("YAML serialization failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Item {
        id: u32,
    }

    #[test]
    fn plain_uses_the_id_function() {
        let items = vec![Item { id: 1 }, Item { id: 2 }];
        let out = render_single(
            OutputFormat::Plain,
            &items,
            |_| String::from("table"),
            |items| {
                items
                    .iter()
                    .map(|i| i.id.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            },
        )
        .unwrap();
        assert_eq!(out, "1\n2");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_json(&[Item { id: 7 }], true).unwrap();
        assert_eq!(out, r#"[{"id":7}]"#);
    }

    #[test]
    fn uncolored_state_is_plain_text() {
        assert_eq!(
            paint_state(ConnectionState::Reconnecting { attempt: 2 }, false),
            "reconnecting (attempt 2)"
        );
        assert_eq!(paint_auth(AuthStatus::Degraded, false), "degraded");
    }
}
