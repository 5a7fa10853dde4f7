//! `status` and `refresh`: one grill's current state.

use std::fmt::Write;

use pitwatch_core::{Bridge, BridgeConfig, DeviceState};

use crate::cli::{DeviceArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

fn detail(name: &str, state: &DeviceState, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Grill:    {name}");
    let _ = writeln!(out, "State:    {}", output::connected_label(state.connected, color));
    let _ = writeln!(
        out,
        "Temp:     {}",
        output::temp_pair(Some(state.grill_temp), Some(state.set_temp))
    );
    let _ = writeln!(
        out,
        "Pellets:  {}",
        state
            .pellet_level
            .map_or_else(|| "-".into(), |p| format!("{p}%"))
    );
    if let Some(status) = state.system_status {
        let _ = writeln!(out, "System:   {status}");
    }
    for probe in &state.probes {
        let _ = writeln!(
            out,
            "Probe {}: {} ({})",
            probe.id,
            output::temp_pair(probe.current_temp, probe.target_temp),
            output::connected_label(probe.connected, color)
        );
    }
    out.trim_end().to_owned()
}

/// `force` skips the cache and always asks the grill.
pub async fn handle(
    config: BridgeConfig,
    args: DeviceArgs,
    force: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let timeout = config.refresh_timeout;
    let identifier = args.device;

    let (device, state) = Bridge::oneshot(config, |bridge| async move {
        let device = util::resolve_device(&bridge, &identifier)?;
        util::await_stream(&bridge).await?;
        let state = if force {
            bridge.refresh_state(&device.thing_id, timeout).await?
        } else {
            bridge.status(&device.thing_id).await?
        };
        Ok((device, state))
    })
    .await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &*state,
        |s| detail(&device.friendly_name, s, color),
        |s| s.grill_temp.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
