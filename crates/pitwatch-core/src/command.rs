// ── Command bridge ──
//
// Fire-and-forget commands, plus the one deliberately blocking operation:
// asking a device for a fresh state and waiting for it to be pushed back.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::credentials::CredentialManager;
use crate::error::CoreError;
use crate::model::DeviceState;
use crate::registry::DeviceRegistry;
use crate::sync::StateSynchronizer;

/// Command code that makes a device publish its current state.
pub const STATUS_REFRESH: &str = "90";

pub struct CommandBridge {
    creds: Arc<CredentialManager>,
    registry: Arc<DeviceRegistry>,
    sync: Arc<StateSynchronizer>,
}

impl CommandBridge {
    pub fn new(
        creds: Arc<CredentialManager>,
        registry: Arc<DeviceRegistry>,
        sync: Arc<StateSynchronizer>,
    ) -> Self {
        Self {
            creds,
            registry,
            sync,
        }
    }

    /// Post a command code to a device. Completion only means the cloud
    /// accepted it.
    pub async fn send_command(&self, thing_id: &str, code: &str) -> Result<(), CoreError> {
        let token = self.creds.token().await?;
        debug!(thing_id, code, "sending command");

        if let Err(e) = self
            .creds
            .client()
            .send_command(token.access_token.expose_secret(), thing_id, code)
            .await
        {
            self.creds.note_failure(&e).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Invalidate the cached state, ask the device for a new one, and wait
    /// up to `timeout` for it to arrive.
    ///
    /// The watcher is always released: by the update that fulfils it, or
    /// explicitly on send failure and on timeout.
    pub async fn refresh_state(
        &self,
        thing_id: &str,
        timeout: Duration,
    ) -> Result<Arc<DeviceState>, CoreError> {
        if !self.registry.contains(thing_id) {
            return Err(CoreError::DeviceNotFound {
                identifier: thing_id.to_owned(),
                available: self.registry.friendly_names(),
            });
        }

        let (watcher, rx) = self.sync.invalidate_and_watch(thing_id).await;

        if let Err(e) = self.send_command(thing_id, STATUS_REFRESH).await {
            self.sync.cancel_watcher(&watcher).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(state)) => Ok(state),
            // Sender dropped: the device left the registry meanwhile.
            Ok(Err(_)) => Err(CoreError::DeviceNotFound {
                identifier: thing_id.to_owned(),
                available: self.registry.friendly_names(),
            }),
            Err(_) => {
                self.sync.cancel_watcher(&watcher).await;
                warn!(thing_id, timeout_ms = timeout_millis(timeout), "state refresh timed out");
                Err(CoreError::Timeout {
                    thing_id: thing_id.to_owned(),
                    timeout,
                })
            }
        }
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────
