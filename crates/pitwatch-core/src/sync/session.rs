// ── MQTT session loop ──
//
// Keeps one MQTT session alive for the synchronizer: sign an endpoint,
// connect, resubscribe on every ConnAck, feed publishes in, and back off
// between failed sessions. Cancellation sends DISCONNECT before leaving.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pitwatch_api::{MqttLink, MqttSession, ReconnectConfig, SessionEvent, calculate_backoff};

use super::StateSynchronizer;
use crate::bridge::ConnectionState;
use crate::credentials::CredentialManager;
use crate::error::CoreError;

/// How long a cancelled session gets to flush its DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Main loop: sign → connect → read → on error, backoff → reconnect.
pub(crate) async fn stream_task(
    creds: Arc<CredentialManager>,
    sync: Arc<StateSynchronizer>,
    reconnect: ReconnectConfig,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let mut attempt: u32 = 0;

    loop {
        let result = run_session(
            &creds,
            &sync,
            &client_id,
            &connection_state,
            &mut attempt,
            &cancel,
        )
        .await;

        sync.detach_link().await;
        if cancel.is_cancelled() {
            break;
        }

        let Err(e) = result else {
            info!("MQTT session ended cleanly, reconnecting");
            attempt = 0;
            continue;
        };

        warn!(error = %e, attempt, "MQTT session failed");

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                error!(max_retries = max, "MQTT reconnection limit reached, giving up");
                let _ = connection_state.send(ConnectionState::Failed);
                break;
            }
        }

        attempt += 1;
        let _ = connection_state.send(ConnectionState::Reconnecting { attempt });

        let delay = calculate_backoff(attempt - 1, &reconnect);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt, "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    sync.detach_link().await;
    debug!("MQTT loop exiting");
}

/// One session lifetime. Returns when the session dies or is cancelled.
async fn run_session(
    creds: &CredentialManager,
    sync: &Arc<StateSynchronizer>,
    client_id: &str,
    connection_state: &watch::Sender<ConnectionState>,
    attempt: &mut u32,
    cancel: &CancellationToken,
) -> Result<(), CoreError> {
    let endpoint = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        endpoint = creds.signed_endpoint() => endpoint?,
    };
    let (link, mut session) = MqttSession::open(endpoint.url.expose_secret(), client_id)?;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            event = session.next_event() => Some(event?),
        };
        let Some(event) = event else {
            close(&link, &mut session).await;
            return Ok(());
        };

        match event {
            SessionEvent::Connected => {
                info!("MQTT connected");
                sync.attach_link(Arc::new(link.clone())).await;
                // Subscribing waits on this loop to drain requests, so it
                // runs beside it.
                let sync = Arc::clone(sync);
                tokio::spawn(async move { sync.resubscribe_all().await });
                *attempt = 0;
                let _ = connection_state.send(ConnectionState::Connected);
            }
            SessionEvent::Message { topic, payload } => {
                sync.handle_message(&topic, &payload).await;
            }
            SessionEvent::Other => {}
        }
    }
}

/// Queue a DISCONNECT and drive the session until it ends or the grace
/// period runs out.
async fn close(link: &MqttLink, session: &mut MqttSession) {
    if let Err(e) = link.disconnect().await {
        debug!(error = %e, "MQTT disconnect not sent");
        return;
    }
    let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
        while session.next_event().await.is_ok() {}
    })
    .await;
    if drained.is_err() {
        debug!("MQTT session did not close within the grace period");
    }
    info!("MQTT disconnected");
}

// ── Tests ────────────────────────────────────────────────────────────
