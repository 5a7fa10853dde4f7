//! `watch`: print state updates as the cloud pushes them, until Ctrl-C.

use std::collections::HashSet;

use chrono::Local;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use pitwatch_core::{Bridge, BridgeConfig, DeviceState, StateUpdate};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct UpdateLine<'a> {
    thing_id: &'a str,
    friendly_name: &'a str,
    state: &'a DeviceState,
}

fn text_line(name: &str, state: &DeviceState, color: bool) -> String {
    let pellets = state
        .pellet_level
        .map_or_else(|| "-".into(), |p| format!("{p}%"));
    let mut line = format!(
        "{} {name:<16} {:<18} pellets {pellets:<5} {}",
        Local::now().format("%H:%M:%S"),
        output::temp_pair(Some(state.grill_temp), Some(state.set_temp)),
        output::connected_label(state.connected, color),
    );
    for probe in state.probes.iter().filter(|p| p.connected) {
        line.push_str(&format!(
            "  {} {}",
            probe.id,
            output::temp_pair(probe.current_temp, probe.target_temp)
        ));
    }
    line
}

fn render(
    update: &StateUpdate,
    name: &str,
    format: &OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    let line = UpdateLine {
        thing_id: &update.thing_id,
        friendly_name: name,
        state: &update.state,
    };
    Ok(match format {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(&line)?,
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(&line)?),
        OutputFormat::Plain => format!(
            "{name}\t{}\t{}",
            update.state.grill_temp, update.state.set_temp
        ),
        OutputFormat::Table => text_line(name, &update.state, color),
    })
}

pub async fn handle(
    mut config: BridgeConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    config.sample_interval = std::time::Duration::ZERO;

    let bridge = Bridge::new(config).await?;
    bridge.start().await?;

    let result = watch_loop(&bridge, &args, global).await;
    bridge.shutdown().await;
    result
}

async fn watch_loop(
    bridge: &Bridge,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let filter: HashSet<String> = args
        .devices
        .iter()
        .map(|id| util::resolve_device(bridge, id).map(|d| d.thing_id))
        .collect::<Result<_, _>>()?;

    // Subscribe before asking for state so no answer is missed.
    let mut updates = bridge.updates();
    util::await_stream(bridge).await?;

    // Seed the output with each device's current state.
    for device in bridge.devices().iter() {
        if !filter.is_empty() && !filter.contains(&device.thing_id) {
            continue;
        }
        let sent = bridge
            .send_command(&device.thing_id, pitwatch_core::STATUS_REFRESH)
            .await;
        if let Err(e) = sent {
            warn!(device = %device.friendly_name, error = %e, "initial refresh failed");
        }
    }

    let color = output::should_color(&global.color);
    let mut connection = bridge.connection_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                if !global.quiet {
                    eprintln!("stream {state}");
                }
            }
            received = updates.recv() => match received {
                Ok(update) => {
                    if !filter.is_empty() && !filter.contains(&update.thing_id) {
                        continue;
                    }
                    let name = bridge
                        .registry()
                        .by_id(&update.thing_id)
                        .map_or_else(|| update.thing_id.clone(), |d| d.friendly_name);
                    let line = render(&update, &name, &global.output, color)?;
                    output::print_output(&line, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch fell behind; some updates were not shown");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
