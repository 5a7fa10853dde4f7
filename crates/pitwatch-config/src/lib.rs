//! Configuration for pitwatch.
//!
//! TOML file + environment layering, password resolution (env + keyring
//! + plaintext), and translation to `pitwatch_core::BridgeConfig`.
//! Missing account credentials are not an error here: they translate to
//! "not configured" and the caller decides what that means.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use pitwatch_api::{CloudEndpoints, ReconnectConfig};
use pitwatch_core::{AccountCredentials, BridgeConfig, HistoryBackend};

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "pitwatch";

/// Env var consulted for the username when the file has none.
pub const USERNAME_ENV: &str = "PITWATCH_USERNAME";

/// Env var consulted for the password when `account.password_env` is unset.
pub const PASSWORD_ENV: &str = "PITWATCH_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Account,

    #[serde(default)]
    pub history: History,

    #[serde(default)]
    pub bridge: Bridge,

    #[serde(default)]
    pub server: Server,
}

/// Cloud account.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Account {
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct History {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// 0 disables sampling.
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Redis server for persistent history. Absent means in-memory.
    pub redis_url: Option<String>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for History {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sample_interval_secs: default_sample_interval_secs(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_retention_secs() -> u64 {
    24 * 3600
}
fn default_sample_interval_secs() -> u64 {
    30
}
fn default_key_prefix() -> String {
    "traeger:history:".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Bridge {
    #[serde(default = "default_timeout_secs")]
    pub refresh_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Overrides for the cloud endpoints (testing against a proxy).
    pub auth_url: Option<String>,
    pub api_url: Option<String>,
    pub client_id: Option<String>,

    /// Give up reconnecting the update stream after this many attempts.
    pub max_reconnects: Option<u32>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
            auth_url: None,
            api_url: None,
            client_id: None,
            max_reconnects: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Server {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "pitwatch", "pitwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("pitwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment.
///
/// Env keys nest on a double underscore, so
/// `PITWATCH_HISTORY__REDIS_URL` sets `history.redis_url`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PITWATCH_").split("__"));

    Ok(figment.extract()?)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// The account username: file first, then `PITWATCH_USERNAME`.
pub fn resolve_username(account: &Account) -> Option<String> {
    account
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| std::env::var(USERNAME_ENV).ok().filter(|u| !u.is_empty()))
}

/// Resolve the password: env var → system keyring → plaintext in config.
pub fn resolve_password(account: &Account, username: &str) -> Option<SecretString> {
    // 1. Env var (named in config, else the default)
    let env_name = account.password_env.as_deref().unwrap_or(PASSWORD_ENV);
    if let Ok(pw) = std::env::var(env_name) {
        if !pw.is_empty() {
            return Some(SecretString::from(pw));
        }
    }

    // 2. Keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, username) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    account
        .password
        .clone()
        .filter(|pw| !pw.is_empty())
        .map(SecretString::from)
}

/// Store a password in the system keyring.
pub fn store_password(username: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, username)?;
    entry.set_password(password)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `BridgeConfig`. `Ok(None)` means the account is not
/// configured (no username or no password anywhere).
pub fn to_bridge_config(cfg: &Config) -> Result<Option<BridgeConfig>, ConfigError> {
    let Some(username) = resolve_username(&cfg.account) else {
        return Ok(None);
    };
    let Some(password) = resolve_password(&cfg.account, &username) else {
        return Ok(None);
    };

    let mut bridge = BridgeConfig::new(AccountCredentials { username, password });
    bridge.endpoints = endpoints(&cfg.bridge)?;
    bridge.request_timeout = Duration::from_secs(cfg.bridge.request_timeout_secs);
    bridge.refresh_timeout = Duration::from_secs(cfg.bridge.refresh_timeout_secs);
    bridge.sample_interval = Duration::from_secs(cfg.history.sample_interval_secs);
    bridge.retention = Duration::from_secs(cfg.history.retention_secs);
    bridge.reconnect = ReconnectConfig {
        max_retries: cfg.bridge.max_reconnects,
        ..ReconnectConfig::default()
    };
    bridge.history = match &cfg.history.redis_url {
        Some(url) => HistoryBackend::Redis {
            url: url.clone(),
            key_prefix: cfg.history.key_prefix.clone(),
        },
        None => HistoryBackend::Memory,
    };

    if cfg.history.retention_secs == 0 {
        return Err(ConfigError::Validation {
            field: "history.retention_secs".into(),
            reason: "must be greater than zero".into(),
        });
    }

    Ok(Some(bridge))
}

fn endpoints(section: &Bridge) -> Result<CloudEndpoints, ConfigError> {
    let mut endpoints = CloudEndpoints::default();
    if let Some(ref raw) = section.auth_url {
        endpoints.auth_url = parse_url("bridge.auth_url", raw)?;
    }
    if let Some(ref raw) = section.api_url {
        endpoints.api_url = parse_url("bridge.api_url", raw)?;
    }
    if let Some(ref id) = section.client_id {
        endpoints.client_id.clone_from(id);
    }
    Ok(endpoints)
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    fn with_account(username: &str, password: &str) -> Config {
        Config {
            account: Account {
                username: Some(username.into()),
                password: Some(password.into()),
                // Point at a variable nobody sets so the ambient env
                // cannot leak in.
                password_env: Some("PITWATCH_TEST_UNSET_PASSWORD".into()),
            },
            ..Config::default()
        }
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.history.retention_secs, 86_400);
        assert_eq!(cfg.history.sample_interval_secs, 30);
        assert_eq!(cfg.history.key_prefix, "traeger:history:");
        assert_eq!(cfg.bridge.refresh_timeout_secs, 10);
        assert_eq!(cfg.server.listen, "127.0.0.1:8080");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[account]
username = "cook@example.com"

[history]
sample_interval_secs = 60
redis_url = "redis://localhost:6379"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.account.username.as_deref(), Some("cook@example.com"));
        assert_eq!(cfg.history.sample_interval_secs, 60);
        assert_eq!(cfg.history.retention_secs, 86_400);
        assert_eq!(cfg.history.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.history.sample_interval_secs, 30);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.server.listen = "0.0.0.0:9000".into();
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.server.listen, "0.0.0.0:9000");
    }

    #[test]
    fn unset_password_env_falls_back_to_file() {
        let account = Account {
            username: Some("pitwatch-test-user".into()),
            password: Some("from-file".into()),
            password_env: Some("PITWATCH_TEST_UNSET_PASSWORD".into()),
        };
        let pw = resolve_password(&account, "pitwatch-test-user").unwrap();
        assert_eq!(pw.expose_secret(), "from-file");
    }

    #[test]
    fn no_username_means_not_configured() {
        let cfg = Config {
            account: Account {
                username: None,
                password: Some("pw".into()),
                password_env: Some("PITWATCH_TEST_UNSET_PASSWORD".into()),
            },
            ..Config::default()
        };
        if std::env::var(USERNAME_ENV).is_err() {
            assert!(to_bridge_config(&cfg).unwrap().is_none());
        }
    }

    #[test]
    fn bridge_config_from_plaintext_account() {
        let cfg = with_account("pitwatch-test-user", "pw");
        let bridge = to_bridge_config(&cfg).unwrap().unwrap();
        assert_eq!(bridge.credentials.username, "pitwatch-test-user");
        assert_eq!(bridge.sample_interval, Duration::from_secs(30));
        assert_eq!(bridge.history, HistoryBackend::Memory);
        assert_eq!(bridge.endpoints, CloudEndpoints::default());
    }

    #[test]
    fn redis_url_selects_redis_backend() {
        let mut cfg = with_account("pitwatch-test-user", "pw");
        cfg.history.redis_url = Some("redis://localhost".into());
        let bridge = to_bridge_config(&cfg).unwrap().unwrap();
        assert_eq!(
            bridge.history,
            HistoryBackend::Redis {
                url: "redis://localhost".into(),
                key_prefix: "traeger:history:".into(),
            }
        );
    }

    #[test]
    fn bad_endpoint_override_is_rejected() {
        let mut cfg = with_account("pitwatch-test-user", "pw");
        cfg.bridge.api_url = Some("not a url".into());
        let err = to_bridge_config(&cfg).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "bridge.api_url")
        );
    }

    #[test]
    fn zero_retention_is_rejected() {
        let mut cfg = with_account("pitwatch-test-user", "pw");
        cfg.history.retention_secs = 0;
        assert!(to_bridge_config(&cfg).is_err());
    }
}
