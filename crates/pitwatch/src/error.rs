//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use pitwatch_config::ConfigError;
use pitwatch_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Setup ────────────────────────────────────────────────────────

    #[error("No account configured")]
    #[diagnostic(
        code(pitwatch::not_configured),
        help(
            "Set a username and password:\n  \
             pitwatch config set-username you@example.com\n  \
             pitwatch config set-password\n\
             Or export PITWATCH_USERNAME and PITWATCH_PASSWORD.\n\
             Config file: {path}"
        )
    )]
    NotConfigured { path: String },

    #[error(transparent)]
    #[diagnostic(code(pitwatch::config))]
    Config(#[from] ConfigError),

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(pitwatch::auth_failed),
        help(
            "Check the account username and password.\n\
             Run: pitwatch config set-password"
        )
    )]
    AuthFailed { message: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("Grill '{identifier}' not found")]
    #[diagnostic(code(pitwatch::not_found), help("Available grills: {available}"))]
    NotFound {
        identifier: String,
        available: String,
    },

    // ── Cloud ────────────────────────────────────────────────────────

    #[error("Cloud request failed: {message}")]
    #[diagnostic(code(pitwatch::cloud))]
    Cloud { message: String },

    #[error("Update stream unavailable: {message}")]
    #[diagnostic(
        code(pitwatch::connection_failed),
        help("Check network access to the vendor cloud, then retry with -v for details.")
    )]
    ConnectionFailed { message: String },

    #[error("Grill '{device}' did not answer within {millis}ms")]
    #[diagnostic(
        code(pitwatch::timeout),
        help("The grill may be off or offline. Increase the wait with --timeout.")
    )]
    Timeout { device: String, millis: u64 },

    #[error("History store error: {message}")]
    #[diagnostic(
        code(pitwatch::store),
        help("Check history.redis_url and that Redis is reachable.")
    )]
    Store { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(pitwatch::validation))]
    Validation { field: String, reason: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotConfigured { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth { message } => CliError::AuthFailed { message },

            CoreError::Fetch { message } => CliError::Cloud { message },

            CoreError::Timeout { thing_id, timeout } => CliError::Timeout {
                device: thing_id,
                millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },

            CoreError::DeviceNotFound {
                identifier,
                available,
            } => CliError::NotFound {
                identifier,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            },

            CoreError::Transport { message } => CliError::ConnectionFailed { message },

            CoreError::NotConfigured => CliError::NotConfigured {
                path: pitwatch_config::config_path().display().to_string(),
            },

            CoreError::Store { message } => CliError::Store { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
