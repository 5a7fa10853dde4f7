//! `serve`: long-running bridge behind the HTTP endpoints.

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use pitwatch_core::Bridge;

use crate::cli::{GlobalOpts, ServeArgs};
use crate::error::CliError;
use crate::server;

use super::util;

pub async fn handle(args: ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let listen = args.listen.unwrap_or_else(|| cfg.server.listen.clone());

    let mut retry = None;
    let bridge = match pitwatch_config::to_bridge_config(&cfg)? {
        Some(mut bridge_config) => {
            if let Some(timeout) = global.timeout {
                bridge_config.refresh_timeout = timeout;
            }
            let bridge = Bridge::new(bridge_config).await?;
            if let Err(e) = bridge.start().await {
                error!(error = %e, "bridge start failed; retrying in the background");
                retry = Some(tokio::spawn(retry_start(bridge.clone())));
            }
            Some(bridge)
        }
        None => {
            warn!("no account configured; grill endpoints will answer 503");
            None
        }
    };

    let listener = TcpListener::bind(listen.as_str()).await?;
    info!(addr = %listen, "listening");

    let app = server::router(server::AppState::new(bridge.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(retry) = retry {
        retry.abort();
    }
    if let Some(bridge) = bridge {
        bridge.shutdown().await;
    }
    info!("stopped");
    Ok(())
}

const START_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Keep trying to bring the bridge up (credentials, devices, stream).
/// Endpoints answer meanwhile; device lookups re-enumerate on demand.
async fn retry_start(bridge: Bridge) {
    loop {
        tokio::time::sleep(START_RETRY_INTERVAL).await;
        match bridge.start().await {
            Ok(()) => {
                info!("bridge started");
                return;
            }
            Err(e) => warn!(error = %e, "bridge start failed"),
        }
    }
}
