// pitwatch-api: Async Rust client for the grill cloud (REST + MQTT update stream)

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod mqtt;
pub mod transport;

pub use client::{CloudClient, CloudEndpoints};
pub use error::Error;
pub use models::{AuthenticationResult, GrillStatus, GrillUpdate, MqttConnection, Thing};
pub use mqtt::{
    InboundMessage, MqttLink, MqttSession, ReconnectConfig, SessionEvent, calculate_backoff,
    update_topic,
};
pub use transport::{TlsMode, TransportConfig};
