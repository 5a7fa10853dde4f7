//! Device listing.

use tabled::Tabled;

use pitwatch_core::{Bridge, BridgeConfig, Device};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Thing ID")]
    thing_id: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            name: d.friendly_name.clone(),
            thing_id: d.thing_id.clone(),
        }
    }
}

pub async fn handle(mut config: BridgeConfig, global: &GlobalOpts) -> Result<(), CliError> {
    // Enumeration is REST only.
    config.stream_enabled = false;

    let devices = Bridge::oneshot(config, |bridge| async move { Ok(bridge.devices()) }).await?;

    let out = output::render_list(
        &global.output,
        devices.as_slice(),
        |d| DeviceRow::from(d),
        |d| d.friendly_name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
