// ── Bridge facade ──
//
// Full lifecycle management for one cloud account: authentication, device
// enumeration, the MQTT update stream, the history sampler, and the
// query/command/history surface the CLI and HTTP server use.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pitwatch_api::CloudClient;
use pitwatch_api::transport::TransportConfig;

use crate::command::CommandBridge;
use crate::config::{BridgeConfig, HistoryBackend};
use crate::credentials::CredentialManager;
use crate::error::CoreError;
use crate::history::{self, MemoryStore, RedisStore, SampleStore, TelemetryHistory};
use crate::model::{Device, DeviceState, TelemetrySample};
use crate::registry::DeviceRegistry;
use crate::sync::{self, StateSynchronizer, StateUpdate};

/// History window used when a caller does not name one.
pub const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(3600);

// ── ConnectionState ──────────────────────────────────────────────

/// Update-stream state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

// ── Bridge ───────────────────────────────────────────────────────

/// The single entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    creds: Arc<CredentialManager>,
    registry: Arc<DeviceRegistry>,
    sync: Arc<StateSynchronizer>,
    commands: CommandBridge,
    history: Arc<TelemetryHistory>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Create a bridge, opening the configured history store. Does NOT
    /// contact the cloud -- call [`start()`](Self::start) for that.
    pub async fn new(config: BridgeConfig) -> Result<Self, CoreError> {
        let store: Arc<dyn SampleStore> = match &config.history {
            HistoryBackend::Memory => Arc::new(MemoryStore::new()),
            HistoryBackend::Redis { url, key_prefix } => {
                Arc::new(RedisStore::connect(url, key_prefix.clone()).await?)
            }
        };
        Self::with_store(config, store)
    }

    /// Create a bridge over an explicit sample store.
    pub fn with_store(
        config: BridgeConfig,
        store: Arc<dyn SampleStore>,
    ) -> Result<Self, CoreError> {
        let transport = TransportConfig::default().with_timeout(config.request_timeout);
        let client = Arc::new(CloudClient::new(config.endpoints.clone(), &transport)?);

        let creds = Arc::new(CredentialManager::new(client, config.credentials.clone()));
        let registry = Arc::new(DeviceRegistry::new());
        let sync = Arc::new(StateSynchronizer::new());
        let commands =
            CommandBridge::new(Arc::clone(&creds), Arc::clone(&registry), Arc::clone(&sync));
        let history = Arc::new(TelemetryHistory::new(
            store,
            Arc::clone(&sync),
            config.retention,
        )?);
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                creds,
                registry,
                sync,
                commands,
                history,
                connection_state,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Authenticate, enumerate devices, and spawn the background tasks
    /// (update stream, history sampler) the configuration asks for.
    pub async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;

        self.inner.creds.token().await?;
        let devices = self.refresh_devices().await?;

        info!(count = devices.len(), "found devices");
        for device in devices.iter() {
            info!(
                friendly_name = %device.friendly_name,
                thing_id = %device.thing_id,
                "device"
            );
        }

        let mut handles = self.inner.task_handles.lock().await;

        if config.stream_enabled {
            let _ = self
                .inner
                .connection_state
                .send(ConnectionState::Connecting);
            handles.push(tokio::spawn(sync::session::stream_task(
                Arc::clone(&self.inner.creds),
                Arc::clone(&self.inner.sync),
                config.reconnect.clone(),
                self.inner.connection_state.clone(),
                self.inner.cancel.clone(),
            )));
        }

        if !config.sample_interval.is_zero() {
            handles.push(tokio::spawn(history::sampler_task(
                Arc::clone(&self.inner.history),
                Arc::clone(&self.inner.registry),
                config.sample_interval,
                self.inner.cancel.clone(),
            )));
        }

        debug!(tasks = handles.len(), "bridge started");
        Ok(())
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("bridge shut down");
    }

    /// One-shot: start, run closure, shut down.
    ///
    /// Optimized for CLI: the history sampler is disabled and samples
    /// stay in memory.
    pub async fn oneshot<F, Fut, T>(config: BridgeConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Bridge) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.sample_interval = Duration::ZERO;

        let bridge = Bridge::with_store(cfg, Arc::new(MemoryStore::new()))?;
        bridge.start().await?;
        let result = f(bridge.clone()).await;
        bridge.shutdown().await;
        result
    }

    /// Wait until the update stream is connected.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.inner.connection_state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Failed)),
        )
        .await;

        match waited {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(CoreError::Transport {
                message: "update stream failed to connect".into(),
            }),
            Err(_) => Err(CoreError::Transport {
                message: format!(
                    "update stream not connected after {}s",
                    timeout.as_secs()
                ),
            }),
        }
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Re-enumerate devices and reconcile subscriptions.
    pub async fn refresh_devices(&self) -> Result<Arc<Vec<Device>>, CoreError> {
        let diff = self.inner.registry.refresh(&self.inner.creds).await?;
        let devices = self.inner.registry.snapshot();
        self.inner.sync.reconcile(&devices).await;

        if !diff.is_empty() {
            debug!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                "device set changed"
            );
        }
        Ok(devices)
    }

    pub fn devices(&self) -> Arc<Vec<Device>> {
        self.inner.registry.snapshot()
    }

    /// Resolve a friendly name. The error lists the names that exist.
    pub fn device_by_name(&self, friendly_name: &str) -> Result<Device, CoreError> {
        self.inner
            .registry
            .by_name(friendly_name)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: friendly_name.to_owned(),
                available: self.inner.registry.friendly_names(),
            })
    }

    // ── State ────────────────────────────────────────────────────

    /// The cached state, if any.
    pub async fn state(&self, thing_id: &str) -> Option<Arc<DeviceState>> {
        self.inner.sync.get_state(thing_id).await
    }

    /// The cached state, or a forced refresh bounded by the configured
    /// timeout when nothing is cached.
    pub async fn status(&self, thing_id: &str) -> Result<Arc<DeviceState>, CoreError> {
        if let Some(state) = self.inner.sync.get_state(thing_id).await {
            return Ok(state);
        }
        self.refresh_state(thing_id, self.inner.config.refresh_timeout)
            .await
    }

    pub async fn refresh_state(
        &self,
        thing_id: &str,
        timeout: Duration,
    ) -> Result<Arc<DeviceState>, CoreError> {
        self.inner.commands.refresh_state(thing_id, timeout).await
    }

    pub async fn send_command(&self, thing_id: &str, code: &str) -> Result<(), CoreError> {
        self.inner.commands.send_command(thing_id, code).await
    }

    // ── History ──────────────────────────────────────────────────

    /// Samples from the last `duration` (default one hour), oldest first.
    pub async fn history(
        &self,
        thing_id: &str,
        duration: Option<Duration>,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        self.inner
            .history
            .recent(thing_id, duration.unwrap_or(DEFAULT_HISTORY_WINDOW))
            .await
    }

    pub async fn history_range(
        &self,
        thing_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, CoreError> {
        self.inner.history.query_range(thing_id, from, to).await
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Every state replacement, as it is applied.
    pub fn updates(&self) -> broadcast::Receiver<StateUpdate> {
        self.inner.sync.subscribe_updates()
    }

    // ── Components ───────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn synchronizer(&self) -> &Arc<StateSynchronizer> {
        &self.inner.sync
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHistory> {
        &self.inner.history
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.inner.creds
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::AccountCredentials;
    use crate::sync::tests::state;
    use pitwatch_api::CloudEndpoints;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base: &str) -> BridgeConfig {
        let mut config = BridgeConfig::new(AccountCredentials {
            username: "cook@example.com".into(),
            password: SecretString::from("pw"),
        });
        config.endpoints = CloudEndpoints::single_host(base).unwrap();
        config.stream_enabled = false;
        config.sample_interval = Duration::ZERO;
        config
    }

    fn offline_bridge() -> Bridge {
        let bridge =
            Bridge::with_store(config_for("http://127.0.0.1:9"), Arc::new(MemoryStore::new()))
                .unwrap();
        bridge.registry().apply(vec![Device {
            thing_id: "abc".into(),
            friendly_name: "Grill1".into(),
        }]);
        bridge
    }

    async fn mount_cloud(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": { "IdToken": "tok", "ExpiresIn": 3600 }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/self"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "things": [
                    { "thingName": "abc", "friendlyName": "Grill1" },
                    { "thingName": "def", "friendlyName": "Grill2" }
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn start_enumerates_devices_and_tracks_subscriptions() {
        let server = MockServer::start().await;
        mount_cloud(&server).await;

        let bridge =
            Bridge::with_store(config_for(&server.uri()), Arc::new(MemoryStore::new())).unwrap();
        bridge.start().await.unwrap();

        assert_eq!(bridge.devices().len(), 2);
        assert_eq!(bridge.device_by_name("Grill2").unwrap().thing_id, "def");
        assert_eq!(
            bridge.synchronizer().subscribed_things().await,
            vec!["abc", "def"]
        );
        bridge.shutdown().await;
        assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn start_surfaces_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "Incorrect username or password."
            })))
            .mount(&server)
            .await;

        let bridge =
            Bridge::with_store(config_for(&server.uri()), Arc::new(MemoryStore::new())).unwrap();
        let err = bridge.start().await.unwrap_err();
        assert!(err.is_auth(), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_name_lists_available() {
        let bridge = offline_bridge();
        match bridge.device_by_name("Smoker").unwrap_err() {
            CoreError::DeviceNotFound { identifier, available } => {
                assert_eq!(identifier, "Smoker");
                assert_eq!(available, vec!["Grill1".to_owned()]);
            }
            other => panic!("expected DeviceNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_prefers_cached_state() {
        let bridge = offline_bridge();
        bridge.synchronizer().apply_state("abc", state(225)).await;

        let status = bridge.status("abc").await.unwrap();
        assert_eq!(status.grill_temp, 225);
    }

    #[tokio::test]
    async fn history_defaults_to_last_hour() {
        let bridge = offline_bridge();
        bridge.synchronizer().apply_state("abc", state(225)).await;

        let now = Utc::now();
        let telemetry = bridge.telemetry();
        telemetry
            .record_sample_at("abc", now - chrono::TimeDelta::seconds(7200))
            .await
            .unwrap();
        telemetry.record_sample_at("abc", now).await.unwrap();

        assert_eq!(bridge.history("abc", None).await.unwrap().len(), 1);
        assert_eq!(
            bridge
                .history("abc", Some(Duration::from_secs(3 * 3600)))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn updates_are_observable() {
        let bridge = offline_bridge();
        let mut updates = bridge.updates();
        bridge
            .synchronizer()
            .handle_message(
                "prod/thing/update/abc",
                br#"{"status":{"grill":225,"set":225,"connected":1}}"#,
            )
            .await;

        let update = updates.recv().await.unwrap();
        assert_eq!(update.thing_id, "abc");
        assert_eq!(update.state.set_temp, 225);
    }

    #[test]
    fn connection_state_displays_snake_case() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting"
        );
    }
}
