//! Shared helpers for command handlers.

use std::path::PathBuf;
use std::time::Duration;

use pitwatch_config::Config;
use pitwatch_core::{Bridge, BridgeConfig, CoreError, Device};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// How long a one-shot command waits for the update stream.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(pitwatch_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(pitwatch_config::load_config_from(&config_file(global))?)
}

/// Translate the loaded config, applying CLI overrides. Missing
/// credentials are an error here; only `serve` tolerates them.
pub fn bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let cfg = load_config(global)?;
    let mut bridge = pitwatch_config::to_bridge_config(&cfg)?.ok_or_else(|| {
        CliError::NotConfigured {
            path: config_file(global).display().to_string(),
        }
    })?;
    if let Some(timeout) = global.timeout {
        bridge.refresh_timeout = timeout;
    }
    Ok(bridge)
}

/// Resolve a friendly name, falling back to a thing id.
pub fn resolve_device(bridge: &Bridge, identifier: &str) -> Result<Device, CoreError> {
    match bridge.device_by_name(identifier) {
        Ok(device) => Ok(device),
        Err(not_found) => bridge.registry().by_id(identifier).ok_or(not_found),
    }
}

/// Wait for the update stream and make sure every device's subscription
/// has been requested, so a state push answering a command is not missed.
pub async fn await_stream(bridge: &Bridge) -> Result<(), CoreError> {
    bridge.wait_connected(CONNECT_TIMEOUT).await?;
    bridge.synchronizer().resubscribe_all().await;
    Ok(())
}
