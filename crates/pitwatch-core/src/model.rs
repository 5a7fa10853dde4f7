// ── Domain types ──
//
// Canonical types shared by every bridge component. Wire payloads are
// converted into these in `convert.rs`; nothing outside this crate sees
// the raw MQTT shapes.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize, Serializer};

// ── Device ───────────────────────────────────────────────────────────

/// A controllable device registered to the account. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub thing_id: String,
    pub friendly_name: String,
}

// ── DeviceState ──────────────────────────────────────────────────────

/// Last known state of one device, as pushed by the cloud.
///
/// Serializes in the shape consumers of the status endpoint expect:
/// `connected` flags are `0`/`1`, probes carry `name`/`get_temp`/`set_temp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub grill_temp: i64,
    pub set_temp: i64,
    pub pellet_level: Option<i64>,
    #[serde(serialize_with = "flag_as_int")]
    pub connected: bool,
    pub system_status: Option<i64>,
    /// In the order the device reported them.
    pub probes: Vec<Probe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    #[serde(rename = "name")]
    pub id: String,
    #[serde(serialize_with = "flag_as_int")]
    pub connected: bool,
    #[serde(rename = "get_temp")]
    pub current_temp: Option<i64>,
    #[serde(rename = "set_temp")]
    pub target_temp: Option<i64>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn flag_as_int<S: Serializer>(flag: &bool, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_u8(u8::from(*flag))
}

// ── TelemetrySample ──────────────────────────────────────────────────

/// One point of a device's temperature history. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub grill_temp: i64,
    pub set_temp: i64,
    #[serde(default)]
    pub pellet_level: Option<i64>,
    /// Connected probes only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<SampleProbe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleProbe {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub get_temp: Option<i64>,
    #[serde(default)]
    pub set_temp: Option<i64>,
}

impl TelemetrySample {
    /// Snapshot a state at `timestamp`.
    pub fn from_state(state: &DeviceState, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            grill_temp: state.grill_temp,
            set_temp: state.set_temp,
            pellet_level: state.pellet_level,
            probes: state
                .probes
                .iter()
                .filter(|p| p.connected)
                .map(|p| SampleProbe {
                    id: p.id.clone(),
                    get_temp: p.current_temp,
                    set_temp: p.target_temp,
                })
                .collect(),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────

/// A short-lived access token.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// A short-lived pre-signed MQTT endpoint.
#[derive(Debug, Clone)]
pub struct SignedEndpoint {
    pub url: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Anything with an expiry checked against a refresh skew.
pub(crate) trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    /// Usable for at least `skew` more.
    fn is_fresh(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at() - now >= skew
    }
}

impl Expiring for Credential {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for SignedEndpoint {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state_with_probes() -> DeviceState {
        DeviceState {
            grill_temp: 250,
            set_temp: 275,
            pellet_level: Some(60),
            connected: true,
            system_status: Some(6),
            probes: vec![
                Probe {
                    id: "p0".into(),
                    connected: true,
                    current_temp: Some(140),
                    target_temp: Some(165),
                },
                Probe {
                    id: "p1".into(),
                    connected: false,
                    current_temp: None,
                    target_temp: None,
                },
            ],
        }
    }

    #[test]
    fn state_serializes_flags_as_ints() {
        let value = serde_json::to_value(state_with_probes()).unwrap();
        assert_eq!(value["connected"], json!(1));
        assert_eq!(value["probes"][0]["name"], json!("p0"));
        assert_eq!(value["probes"][0]["get_temp"], json!(140));
        assert_eq!(value["probes"][1]["connected"], json!(0));
    }

    #[test]
    fn sample_keeps_only_connected_probes() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let sample = TelemetrySample::from_state(&state_with_probes(), at);
        assert_eq!(sample.grill_temp, 250);
        assert_eq!(sample.probes.len(), 1);
        assert_eq!(sample.probes[0].id, "p0");
    }

    #[test]
    fn sample_json_carries_unix_timestamp() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut state = state_with_probes();
        state.probes.clear();
        let value = serde_json::to_value(TelemetrySample::from_state(&state, at)).unwrap();
        assert_eq!(
            value,
            json!({
                "timestamp": 1_700_000_000,
                "grill_temp": 250,
                "set_temp": 275,
                "pellet_level": 60
            })
        );
    }

    #[test]
    fn freshness_respects_skew() {
        let now = Utc::now();
        let cred = Credential {
            access_token: SecretString::from("t"),
            expires_at: now + chrono::Duration::seconds(59),
        };
        assert!(!cred.is_fresh(now, chrono::Duration::seconds(60)));
        assert!(cred.is_fresh(now, chrono::Duration::seconds(30)));
    }
}
