//! `history`: recorded temperature samples for one grill.

use chrono::Local;
use tabled::Tabled;
use tracing::warn;

use pitwatch_core::{Bridge, BridgeConfig, HistoryBackend, TelemetrySample};

use crate::cli::{GlobalOpts, HistoryArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Grill")]
    grill: i64,
    #[tabled(rename = "Set")]
    set: i64,
    #[tabled(rename = "Pellets")]
    pellets: String,
    #[tabled(rename = "Probes")]
    probes: String,
}

impl From<&TelemetrySample> for SampleRow {
    fn from(s: &TelemetrySample) -> Self {
        Self {
            time: s
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            grill: s.grill_temp,
            set: s.set_temp,
            pellets: s
                .pellet_level
                .map_or_else(|| "-".into(), |p| format!("{p}%")),
            probes: s
                .probes
                .iter()
                .map(|p| {
                    let temp = p.get_temp.map_or_else(|| "-".into(), |t| t.to_string());
                    format!("{}={temp}", p.id)
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

pub async fn handle(
    mut config: BridgeConfig,
    args: HistoryArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if config.history == HistoryBackend::Memory {
        warn!("history.redis_url is not set; only a running `pitwatch serve` keeps history");
    }
    // Read-only: no stream, no sampler.
    config.stream_enabled = false;
    config.sample_interval = std::time::Duration::ZERO;

    let bridge = Bridge::new(config).await?;
    bridge.refresh_devices().await?;
    let device = util::resolve_device(&bridge, &args.device)?;
    let samples = bridge.history(&device.thing_id, Some(args.since)).await?;

    let out = output::render_list(
        &global.output,
        samples.as_slice(),
        |s| SampleRow::from(s),
        |s| format!("{}\t{}\t{}", s.timestamp.timestamp(), s.grill_temp, s.set_temp),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
