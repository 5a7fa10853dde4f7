//! MQTT-over-WebSocket link to the cloud's update broker.
//!
//! The broker is reached through a short-lived pre-signed `wss://` URL
//! (see [`CloudClient::create_mqtt_connection`](crate::CloudClient::create_mqtt_connection)).
//! [`MqttSession::open`] turns that URL into a pair: an [`MqttLink`] for
//! subscribe/unsubscribe calls, and the [`MqttSession`] itself, which must
//! be polled continuously to drive the connection and receive messages.
//!
//! Reconnection policy is left to the caller: a session that returns an
//! error is dead, and a new one should be opened with a fresh signed URL
//! after [`calculate_backoff`] has elapsed.
//!
//! # Example
//!
//! ```rust,ignore
//! let (link, mut session) = MqttSession::open(&signed_url, &client_id)?;
//! loop {
//!     match session.next_event().await? {
//!         SessionEvent::Connected => link.subscribe(&update_topic("abc")).await?,
//!         SessionEvent::Message { topic, payload } => {
//!             let msg = InboundMessage::parse(&topic, &payload);
//!         }
//!         SessionEvent::Other => {}
//!     }
//! }
//! ```

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use url::Url;

use crate::error::Error;
use crate::models::GrillUpdate;

// ── Topics ───────────────────────────────────────────────────────────

/// Prefix of the per-device status topic.
pub const UPDATE_TOPIC_PREFIX: &str = "prod/thing/update/";

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// The status topic for one device.
pub fn update_topic(thing_id: &str) -> String {
    format!("{UPDATE_TOPIC_PREFIX}{thing_id}")
}

/// Extract the device id from a status topic, if it is one.
pub fn thing_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(UPDATE_TOPIC_PREFIX)
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

// ── InboundMessage ───────────────────────────────────────────────────

/// A classified inbound publish.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A well-formed status update for one device.
    StateUpdate { thing_id: String, update: GrillUpdate },
    /// Addressed to a device, but the payload could not be decoded.
    Unparseable { thing_id: String, reason: String },
    /// Not a status topic at all.
    Unrelated { topic: String },
}

impl InboundMessage {
    /// Classify a publish by topic and decode its payload.
    pub fn parse(topic: &str, payload: &[u8]) -> Self {
        let Some(thing_id) = thing_id_from_topic(topic) else {
            return Self::Unrelated {
                topic: topic.to_owned(),
            };
        };

        match serde_json::from_slice::<GrillUpdate>(payload) {
            Ok(update) => Self::StateUpdate {
                thing_id: thing_id.to_owned(),
                update,
            },
            Err(e) => Self::Unparseable {
                thing_id: thing_id.to_owned(),
                reason: e.to_string(),
            },
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for MQTT reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::as_conversions
)]
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── MqttLink ─────────────────────────────────────────────────────────

/// Request side of an MQTT session: subscribe, unsubscribe, disconnect.
///
/// Cheaply cloneable. Requests are queued and only reach the broker while
/// the owning [`MqttSession`] is being polled.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    /// Subscribe with QoS 1 (at least once).
    pub async fn subscribe(&self, topic: &str) -> Result<(), Error> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Mqtt(format!("subscribe {topic}: {e}")))
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| Error::Mqtt(format!("unsubscribe {topic}: {e}")))
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.client
            .disconnect()
            .await
            .map_err(|e| Error::Mqtt(format!("disconnect: {e}")))
    }
}

// ── MqttSession ──────────────────────────────────────────────────────

/// What a single poll of the session produced.
#[derive(Debug)]
pub enum SessionEvent {
    /// The broker acknowledged the connection. Subscriptions do not
    /// survive a reconnect, so this is the point to (re)subscribe.
    Connected,
    /// A publish arrived.
    Message { topic: String, payload: Bytes },
    /// Protocol traffic with no meaning to callers (acks, pings).
    Other,
}

/// Event side of an MQTT session.
pub struct MqttSession {
    eventloop: EventLoop,
}

impl MqttSession {
    /// Build a session for a pre-signed URL. Does not touch the network;
    /// the connection is made on the first [`next_event`](Self::next_event).
    pub fn open(signed_url: &str, client_id: &str) -> Result<(MqttLink, Self), Error> {
        let broker = broker_url(signed_url)?;
        let port = broker.port_or_known_default().unwrap_or(443);

        let mut options = MqttOptions::new(client_id, broker.as_str(), port);
        options.set_transport(Transport::wss_with_default_config());
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        tracing::debug!(host = broker.host_str().unwrap_or(""), "MQTT session prepared");

        Ok((MqttLink { client }, Self { eventloop }))
    }

    /// Drive the connection until it produces the next event.
    ///
    /// An error means the session is dead; open a new one.
    pub async fn next_event(&mut self) -> Result<SessionEvent, Error> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))?;

        Ok(match event {
            Event::Incoming(Packet::ConnAck(_)) => SessionEvent::Connected,
            Event::Incoming(Packet::Publish(publish)) => SessionEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            },
            Event::Incoming(Packet::Disconnect) => {
                return Err(Error::Mqtt("broker sent DISCONNECT".into()));
            }
            _ => SessionEvent::Other,
        })
    }
}

/// Normalise a signed URL into the `wss://host/path?query` form the
/// WebSocket transport expects.
fn broker_url(signed_url: &str) -> Result<Url, Error> {
    let parsed = Url::parse(signed_url)
        .map_err(|e| Error::MqttConnect(format!("bad signed URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::MqttConnect("signed URL has no host".into()))?;

    let mut normalised = format!("wss://{host}{}", parsed.path());
    if let Some(query) = parsed.query() {
        normalised.push('?');
        normalised.push_str(query);
    }
    Url::parse(&normalised).map_err(|e| Error::MqttConnect(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trip() {
        assert_eq!(update_topic("abc"), "prod/thing/update/abc");
        assert_eq!(thing_id_from_topic("prod/thing/update/abc"), Some("abc"));
    }

    #[test]
    fn foreign_topics_are_rejected() {
        assert_eq!(thing_id_from_topic("prod/thing/update/"), None);
        assert_eq!(thing_id_from_topic("prod/thing/update/abc/extra"), None);
        assert_eq!(thing_id_from_topic("prod/thing/delta/abc"), None);
    }

    #[test]
    fn parse_state_update() {
        let payload = br#"{"status":{"grill":225,"set":225,"connected":1}}"#;
        match InboundMessage::parse("prod/thing/update/abc", payload) {
            InboundMessage::StateUpdate { thing_id, update } => {
                assert_eq!(thing_id, "abc");
                assert_eq!(update.status.grill, 225);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn parse_malformed_payload() {
        let msg = InboundMessage::parse("prod/thing/update/abc", b"not json at all");
        assert!(
            matches!(msg, InboundMessage::Unparseable { ref thing_id, .. } if thing_id == "abc"),
            "got {msg:?}"
        );
    }

    #[test]
    fn parse_unrelated_topic() {
        let msg = InboundMessage::parse("$aws/things/abc/shadow", b"{}");
        assert!(matches!(msg, InboundMessage::Unrelated { .. }));
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
        // Huge attempt counts must not overflow.
        let _ = calculate_backoff(u32::MAX, &config);
    }

    #[test]
    fn broker_url_forces_wss() {
        let url = broker_url("https://iot.example.com/mqtt?X-Amz-Signature=abc").unwrap();
        assert_eq!(url.as_str(), "wss://iot.example.com/mqtt?X-Amz-Signature=abc");
    }

    #[test]
    fn broker_url_rejects_garbage() {
        assert!(matches!(broker_url("::nope::"), Err(Error::MqttConnect(_))));
    }
}
