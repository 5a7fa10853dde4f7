// ── Runtime bridge configuration ──
//
// These types describe *how* to reach the cloud and how to keep history.
// They carry credential data and tuning, but never touch disk.
// The CLI constructs a `BridgeConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;

use pitwatch_api::{CloudEndpoints, ReconnectConfig};

/// Account credentials for the username/password exchange.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Where telemetry samples are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HistoryBackend {
    /// Process-local; lost on restart.
    #[default]
    Memory,
    /// Sorted set per device on a Redis server.
    Redis { url: String, key_prefix: String },
}

/// Configuration for one bridge instance (one cloud account).
///
/// Built by the CLI, passed to `Bridge` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub credentials: AccountCredentials,
    /// Cloud hosts and app client id.
    pub endpoints: CloudEndpoints,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// How long `refresh_state` waits for a state push.
    pub refresh_timeout: Duration,
    /// Sampler period. Zero disables the sampler.
    pub sample_interval: Duration,
    /// Samples older than this are pruned after every insert.
    pub retention: Duration,
    pub history: HistoryBackend,
    /// Open the MQTT update stream on start.
    pub stream_enabled: bool,
    pub reconnect: ReconnectConfig,
}

impl BridgeConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

    /// Defaults for everything except the account.
    pub fn new(credentials: AccountCredentials) -> Self {
        Self {
            credentials,
            endpoints: CloudEndpoints::default(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            refresh_timeout: Self::DEFAULT_REFRESH_TIMEOUT,
            sample_interval: Self::DEFAULT_SAMPLE_INTERVAL,
            retention: Self::DEFAULT_RETENTION,
            history: HistoryBackend::Memory,
            stream_enabled: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}
