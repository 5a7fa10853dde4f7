// pitwatch-core: Telemetry and command bridge between pitwatch-api and consumers (CLI/HTTP).

pub mod bridge;
pub mod command;
pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod history;
pub mod model;
pub mod registry;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, ConnectionState, DEFAULT_HISTORY_WINDOW};
pub use command::{CommandBridge, STATUS_REFRESH};
pub use config::{AccountCredentials, BridgeConfig, HistoryBackend};
pub use credentials::CredentialManager;
pub use error::CoreError;
pub use history::{MemoryStore, RedisStore, SampleStore, TelemetryHistory};
pub use registry::{DeviceRegistry, RegistryDiff};
pub use sync::{StateSynchronizer, StateUpdate, TopicLink, WatcherId};

pub use model::{
    Credential, Device, DeviceState, Probe, SampleProbe, SignedEndpoint, TelemetrySample,
};
