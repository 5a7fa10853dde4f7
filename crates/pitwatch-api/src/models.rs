// Wire models for the cloud REST API and the MQTT status payloads.
//
// Field names follow the vendor's JSON exactly (PascalCase for the auth
// provider, camelCase for the REST API, snake_case inside MQTT payloads).

use serde::{Deserialize, Deserializer, Serialize};

// ── Auth exchange ────────────────────────────────────────────────────

/// Request body for the `USER_PASSWORD_AUTH` flow.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InitiateAuthRequest<'a> {
    pub auth_flow: &'static str,
    pub client_id: &'a str,
    pub auth_parameters: AuthParameters<'a>,
    pub client_metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) struct AuthParameters<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InitiateAuthResponse {
    #[serde(default)]
    pub authentication_result: Option<AuthenticationResult>,
}

/// Tokens issued by a successful auth exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationResult {
    /// The token sent verbatim in the `Authorization` header.
    pub id_token: String,
    /// Lifetime of `id_token` in seconds, relative to the request time.
    pub expires_in: i64,
}

/// Error body returned by the auth provider on rejection.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthErrorBody {
    #[serde(rename = "__type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ── REST API ─────────────────────────────────────────────────────────

/// `GET /users/self` response. Only the device list is of interest.
#[derive(Debug, Deserialize)]
pub(crate) struct UserSelf {
    #[serde(default)]
    pub things: Vec<Thing>,
}

/// A device ("thing") registered to the account, as the API reports it.
///
/// Both fields are optional on the wire; the registry decides what to do
/// with incomplete entries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    #[serde(default)]
    pub thing_name: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommandRequest<'a> {
    pub command: &'a str,
}

/// `POST /mqtt-connections` response: a pre-signed WebSocket URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConnection {
    pub signed_url: String,
    pub expiration_seconds: i64,
}

// ── MQTT payloads ────────────────────────────────────────────────────

/// A status push on `prod/thing/update/<thingId>`.
#[derive(Debug, Clone, Deserialize)]
pub struct GrillUpdate {
    pub status: GrillStatus,
    /// Some firmware revisions put accessories next to `status`.
    #[serde(default)]
    pub acc: Vec<Accessory>,
}

impl GrillUpdate {
    /// All accessories reported by this update, wherever they appeared.
    pub fn accessories(&self) -> impl Iterator<Item = &Accessory> {
        self.status.acc.iter().chain(self.acc.iter())
    }
}

/// The `status` object of an update.
#[derive(Debug, Clone, Deserialize)]
pub struct GrillStatus {
    #[serde(deserialize_with = "lenient_int")]
    pub grill: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub set: i64,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub pellet_level: Option<i64>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub connected: bool,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub system_status: Option<i64>,
    #[serde(default)]
    pub acc: Vec<Accessory>,
}

/// An accessory slot. Only `type == "probe"` entries carry a probe reading.
#[derive(Debug, Clone, Deserialize)]
pub struct Accessory {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub con: bool,
    #[serde(default)]
    pub probe: Option<ProbeReading>,
}

impl Accessory {
    pub fn is_probe(&self) -> bool {
        self.kind == "probe"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReading {
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub get_temp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub set_temp: Option<i64>,
}

// ── Lenient scalar decoding ──────────────────────────────────────────
//
// Grill firmware is inconsistent: flags arrive as 0/1 or
// true/false and temperatures occasionally as floats.

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    fn as_int(&self) -> i64 {
        match *self {
            Self::Bool(b) => i64::from(b),
            Self::Int(i) => i,
            Self::Float(f) => f.round() as i64,
        }
    }
}

fn lenient_int<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    Scalar::deserialize(de).map(|s| s.as_int())
}

fn lenient_opt_int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<Scalar>::deserialize(de)?.map(|s| s.as_int()))
}

fn lenient_flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    Ok(Option::<Scalar>::deserialize(de)?.is_some_and(|s| s.as_int() != 0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_update_parses() {
        let raw = json!({ "status": { "grill": 225, "set": 225, "connected": 1 } });
        let update: GrillUpdate = serde_json::from_value(raw).unwrap();
        assert_eq!(update.status.grill, 225);
        assert_eq!(update.status.set, 225);
        assert!(update.status.connected);
        assert_eq!(update.status.pellet_level, None);
        assert_eq!(update.accessories().count(), 0);
    }

    #[test]
    fn flags_accept_bool_and_int() {
        let raw = json!({ "status": { "grill": 100, "set": 180, "connected": false } });
        let update: GrillUpdate = serde_json::from_value(raw).unwrap();
        assert!(!update.status.connected);

        let raw = json!({ "status": { "grill": 100, "set": 180, "connected": 0 } });
        let update: GrillUpdate = serde_json::from_value(raw).unwrap();
        assert!(!update.status.connected);
    }

    #[test]
    fn float_temperatures_are_rounded() {
        let raw = json!({ "status": { "grill": 224.6, "set": 225, "pellet_level": 80.2 } });
        let update: GrillUpdate = serde_json::from_value(raw).unwrap();
        assert_eq!(update.status.grill, 225);
        assert_eq!(update.status.pellet_level, Some(80));
    }

    #[test]
    fn accessories_from_status_and_top_level() {
        let raw = json!({
            "status": {
                "grill": 250, "set": 250,
                "acc": [{
                    "uuid": "p0", "type": "probe", "con": 1,
                    "probe": { "get_temp": 140, "set_temp": 165 }
                }]
            },
            "acc": [{ "uuid": "x1", "type": "fan", "con": 1 }]
        });
        let update: GrillUpdate = serde_json::from_value(raw).unwrap();
        let acc: Vec<_> = update.accessories().collect();
        assert_eq!(acc.len(), 2);
        assert!(acc[0].is_probe());
        assert_eq!(acc[0].probe.as_ref().unwrap().get_temp, Some(140));
        assert!(!acc[1].is_probe());
    }

    #[test]
    fn missing_grill_temperature_is_rejected() {
        let raw = json!({ "status": { "set": 225 } });
        assert!(serde_json::from_value::<GrillUpdate>(raw).is_err());
    }

    #[test]
    fn thing_fields_are_optional() {
        let thing: Thing = serde_json::from_value(json!({ "friendlyName": "Patio" })).unwrap();
        assert_eq!(thing.thing_name, None);
        assert_eq!(thing.friendly_name.as_deref(), Some("Patio"));
    }
}
