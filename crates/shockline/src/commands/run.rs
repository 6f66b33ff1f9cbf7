//! `shockline run`: host the engine until interrupted.

use chrono::Local;
use futures_util::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use shockline_core::{
    Change, Device, DeviceId, HubPresence, PassOutcome, PresenceChannel, build_engine,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let mut engine_cfg = config::engine_config(&cfg, global)?;
    if args.no_presence {
        engine_cfg.presence = false;
    }

    let engine = build_engine(&engine_cfg)?;
    let cancel = CancellationToken::new();
    let presence = if engine_cfg.presence {
        Some(HubPresence::connect(&engine_cfg, cancel.clone())?)
    } else {
        None
    };

    let mut changes = engine.change_stream();
    engine.start(presence.as_ref().map(PresenceChannel::subscribe))?;
    info!(
        backend = %engine_cfg.backend,
        presence = engine_cfg.presence,
        "shockline running, press Ctrl-C to stop"
    );

    let color = output::should_color(global.color);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            change = changes.next() => match change {
                Some(Ok(change)) => {
                    if !global.quiet {
                        let line = render_change(&change, &engine.roster(), global.output, color)?;
                        output::print_output(&line, false);
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "change stream lagged");
                }
                None => break,
            },
        }
    }

    engine.shutdown().await;
    cancel.cancel();
    if let Some(presence) = presence {
        presence.shutdown();
    }
    Ok(())
}

/// One change as a line of output. Structured formats emit one compact
/// document per change.
fn render_change(
    change: &Change,
    roster: &[Device],
    format: OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(change, true),
        OutputFormat::Yaml => serde_yaml::to_string(change)
            .map(|doc| format!("---\n{}", doc.trim_end()))
            .map_err(|e| CliError::Internal(format!("YAML serialization failed: {e}"))),
        OutputFormat::Table | OutputFormat::Plain => Ok(format!(
            "{} {}",
            Local::now().format("%H:%M:%S"),
            describe(change, roster, color)
        )),
    }
}

fn describe(change: &Change, roster: &[Device], color: bool) -> String {
    let name = |id: DeviceId| {
        roster
            .iter()
            .find(|d| d.id == id)
            .map_or_else(|| id.to_string(), |d| format!("{} ({id})", d.name))
    };

    match change {
        Change::Reconciled(report) => {
            let auth = if report.auth_degraded {
                ", auth degraded"
            } else {
                ""
            };
            match &report.outcome {
                PassOutcome::Completed => format!(
                    "pass {}: +{} -{} skipped {}{auth}",
                    report.pass,
                    report.added.len(),
                    report.removed.len(),
                    report.skipped.len()
                ),
                PassOutcome::Aborted { reason } => {
                    format!("pass {} aborted: {reason}{auth}", report.pass)
                }
            }
        }
        Change::StateChanged { device, state } => {
            format!("{} {}", name(*device), output::paint_state(*state, color))
        }
        Change::Removed { device, reason } => format!("{} removed ({reason})", name(*device)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shockline_core::{ConnectionState, RemovalReason};
    use uuid::Uuid;

    #[test]
    fn describes_changes_with_roster_names() {
        let id = DeviceId::new(Uuid::new_v4());
        let roster = vec![Device::new(id, "Desk hub")];

        let line = describe(
            &Change::StateChanged {
                device: id,
                state: ConnectionState::Connected,
            },
            &roster,
            false,
        );
        assert_eq!(line, format!("Desk hub ({id}) connected"));

        let line = describe(
            &Change::Removed {
                device: id,
                reason: RemovalReason::LeftRoster,
            },
            &[],
            false,
        );
        assert_eq!(line, format!("{id} removed (left_roster)"));
    }

    #[test]
    fn structured_output_is_one_line_per_change() {
        let change = Change::Removed {
            device: DeviceId::new(Uuid::nil()),
            reason: RemovalReason::Unreachable,
        };
        let line = render_change(&change, &[], OutputFormat::Json, false).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""change":"removed""#));
    }
}
