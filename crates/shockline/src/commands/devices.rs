//! `shockline devices`: list the roster, optionally syncing shocker
//! preferences into the config file.

use tabled::Tabled;
use tracing::info;

use shockline_core::{ApiRoster, Device, RosterSource};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ShockerRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Shocker")]
    shocker: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "RF")]
    rf_id: String,
    #[tabled(rename = "Paused")]
    paused: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

fn rows(devices: &[Device], cfg: &Config) -> Vec<ShockerRow> {
    let mut rows = Vec::new();
    for device in devices {
        if device.shockers.is_empty() {
            rows.push(ShockerRow {
                device: device.name.clone(),
                shocker: "-".into(),
                id: device.id.to_string(),
                model: String::new(),
                rf_id: String::new(),
                paused: String::new(),
                enabled: String::new(),
            });
        }
        for s in &device.shockers {
            rows.push(ShockerRow {
                device: device.name.clone(),
                shocker: s.name.clone(),
                id: s.id.to_string(),
                model: s.model.clone(),
                rf_id: s.rf_id.to_string(),
                paused: if s.is_paused { "yes" } else { "no" }.into(),
                enabled: if cfg.shocker_enabled(&s.id) { "yes" } else { "no" }.into(),
            });
        }
    }
    rows
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let engine_cfg = config::engine_config(&cfg, global)?;

    let devices = ApiRoster::new(engine_cfg.api_client()?)
        .fetch_devices()
        .await?;
    info!(count = devices.len(), "fetched roster");

    // Flag overrides stay out of the file, so sync against the stored config.
    let cfg = if args.sync {
        let mut stored = config::load_config()?;
        let sync = stored.sync_shockers(&devices);
        let path = config::save_config(&stored)?;
        if !global.quiet {
            eprintln!(
                "✓ Synced shockers into {}: {} added, {} removed, {} kept",
                path.display(),
                sync.added,
                sync.removed,
                sync.kept
            );
        }
        stored
    } else {
        cfg
    };

    let out = output::render_single(
        global.output,
        &devices,
        |d| output::render_table(&rows(d, &cfg)),
        |d| {
            d.iter()
                .map(|device| device.id.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
