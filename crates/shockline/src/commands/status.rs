//! `shockline status`: one reconciliation pass, then a snapshot.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use shockline_core::{
    AuthStatus, Change, ConnectionState, DeviceId, PassOutcome, PassReport, build_engine,
};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── View model ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StatusView {
    backend: String,
    auth: AuthStatus,
    report: PassReport,
    connections: Vec<ConnectionView>,
}

#[derive(Debug, Serialize)]
struct ConnectionView {
    device: DeviceId,
    name: String,
    state: ConnectionState,
}

#[derive(Tabled)]
struct ConnectionRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
}

fn detail(view: &StatusView, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Backend:  {}", view.backend);
    let _ = writeln!(out, "Auth:     {}", output::paint_auth(view.auth, color));
    let _ = writeln!(
        out,
        "Pass:     #{} ({} connected, {} skipped)",
        view.report.pass,
        view.connections.len(),
        view.report.skipped.len()
    );
    for skipped in &view.report.skipped {
        let _ = writeln!(out, "  skipped {} ({})", skipped.device, skipped.reason);
    }

    if view.connections.is_empty() {
        out.push_str("\nNo live connections.");
        return out;
    }

    let rows: Vec<ConnectionRow> = view
        .connections
        .iter()
        .map(|c| ConnectionRow {
            device: c.device.to_string(),
            name: c.name.clone(),
            state: output::paint_state(c.state, color),
        })
        .collect();
    out.push('\n');
    out.push_str(&output::render_table(&rows));
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let mut engine_cfg = config::engine_config(&cfg, global)?;
    engine_cfg.refresh_interval = None;

    let engine = build_engine(&engine_cfg)?;
    let mut changes = engine.subscribe();
    engine.start(None)?;

    let report = first_report(&mut changes).await;
    if report.as_ref().is_some_and(PassReport::is_completed) {
        let mut watch = engine.watch_connections();
        let settled = tokio::time::timeout(
            Duration::from_secs(args.settle),
            watch.wait_for(|snap| snap.values().all(ConnectionState::is_connected)),
        )
        .await;
        debug!(settled = settled.is_ok(), "connection settle finished");
    }

    let auth = engine.auth_status();
    let roster = engine.roster();
    let connections = engine
        .connections()
        .iter()
        .map(|(device, state)| ConnectionView {
            device: *device,
            name: roster
                .iter()
                .find(|d| d.id == *device)
                .map(|d| d.name.clone())
                .unwrap_or_default(),
            state: *state,
        })
        .collect();
    engine.shutdown().await;

    let Some(report) = report else {
        return Err(CliError::Internal("engine stopped before its first pass".into()));
    };
    if let PassOutcome::Aborted { ref reason } = report.outcome {
        return Err(if auth == AuthStatus::Degraded {
            CliError::AuthFailed
        } else {
            CliError::RosterUnavailable {
                reason: reason.clone(),
            }
        });
    }

    let view = StatusView {
        backend: engine_cfg.backend.to_string(),
        auth,
        report,
        connections,
    };
    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &view,
        |v| detail(v, color),
        |v| {
            v.connections
                .iter()
                .map(|c| format!("{} {}", c.device, c.state))
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Wait for the first `Reconciled` signal.
async fn first_report(changes: &mut broadcast::Receiver<Change>) -> Option<PassReport> {
    loop {
        match changes.recv().await {
            Ok(Change::Reconciled(report)) => return Some(report),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}
