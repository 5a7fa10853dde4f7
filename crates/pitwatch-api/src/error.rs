use thiserror::Error;

/// Top-level error type for the `pitwatch-api` crate.
///
/// Covers every failure mode across both surfaces: the REST API
/// (authentication, device listing, commands) and the MQTT update stream.
/// `pitwatch-core` maps these into the bridge's error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The auth exchange was rejected (wrong credentials, locked account, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The API rejected a token we believed to be valid.
    #[error("Access token rejected -- re-authentication required")]
    TokenRejected,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success status from the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── MQTT ────────────────────────────────────────────────────────
    /// Could not open the MQTT session (bad signed URL, handshake failure).
    #[error("MQTT connection failed: {0}")]
    MqttConnect(String),

    /// The MQTT session failed after being established.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::TokenRejected)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::MqttConnect(_) | Self::Mqtt(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_expired() {
        let err = Error::Authentication {
            message: "Incorrect username or password.".into(),
        };
        assert!(err.is_auth_expired());
        assert!(!err.is_transient());
        assert!(Error::TokenRejected.is_auth_expired());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());

        let err = Error::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn api_404_is_not_found() {
        let err = Error::Api {
            status: 404,
            message: "no such thing".into(),
        };
        assert!(err.is_not_found());
    }
}
