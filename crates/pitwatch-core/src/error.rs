// ── Core error types ──
//
// User-facing errors from pitwatch-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<pitwatch_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credential errors ────────────────────────────────────────────
    /// Recoverable: the next access retries the exchange.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    // ── Request errors ───────────────────────────────────────────────
    #[error("Fetch failed: {message}")]
    Fetch { message: String },

    #[error("No state update from {thing_id} within {}ms", timeout.as_millis())]
    Timeout { thing_id: String, timeout: Duration },

    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        identifier: String,
        /// Friendly names that would have matched.
        available: Vec<String>,
    },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Transport error: {message}")]
    Transport { message: String },

    // ── Setup errors ─────────────────────────────────────────────────
    #[error("Bridge not configured: account credentials are missing")]
    NotConfigured,

    #[error("History store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Reclassify an API failure that happened while fetching data.
    /// Auth failures stay auth failures; everything else is a fetch error.
    pub(crate) fn fetch(err: pitwatch_api::Error) -> Self {
        if err.is_auth_expired() {
            return Self::from(err);
        }
        Self::Fetch {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<pitwatch_api::Error> for CoreError {
    fn from(err: pitwatch_api::Error) -> Self {
        use pitwatch_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::Auth { message },
            Api::TokenRejected => CoreError::Auth {
                message: "access token rejected".into(),
            },
            Api::Transport(e) => CoreError::Transport {
                message: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::Transport {
                message: format!("TLS error: {message}"),
            },
            Api::Api { status, message } => CoreError::Fetch {
                message: format!("HTTP {status}: {message}"),
            },
            Api::MqttConnect(message) | Api::Mqtt(message) => CoreError::Transport { message },
            Api::Deserialization { message, body: _ } => CoreError::Fetch {
                message: format!("unexpected response: {message}"),
            },
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::Store {
            message: err.to_string(),
        }
    }
}
