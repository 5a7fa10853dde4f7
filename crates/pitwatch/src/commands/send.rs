//! Raw command codes.

use pitwatch_core::{Bridge, BridgeConfig};

use crate::cli::{CommandArgs, GlobalOpts};
use crate::error::CliError;

use super::util;

pub async fn handle(
    mut config: BridgeConfig,
    args: CommandArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.code.trim().is_empty() {
        return Err(CliError::Validation {
            field: "code".into(),
            reason: "command code cannot be empty".into(),
        });
    }
    config.stream_enabled = false;

    let code = args.code;
    let name = Bridge::oneshot(config, |bridge| async move {
        let device = util::resolve_device(&bridge, &args.device)?;
        bridge.send_command(&device.thing_id, &code).await?;
        Ok(device.friendly_name)
    })
    .await?;

    if !global.quiet {
        eprintln!("Command sent to {name}");
    }
    Ok(())
}
