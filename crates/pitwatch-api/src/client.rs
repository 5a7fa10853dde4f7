// Cloud REST client
//
// Wraps `reqwest::Client` with URL construction against the two cloud
// hosts (the auth provider and the REST API) and uniform response
// handling. The auth exchange lives in `auth.rs` as inherent methods.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{CommandRequest, MqttConnection, Thing, UserSelf};
use crate::transport::TransportConfig;

/// Where the cloud lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEndpoints {
    /// Auth provider root (receives the `InitiateAuth` POST).
    pub auth_url: Url,
    /// REST API root, including the stage prefix (e.g. `.../prod`).
    pub api_url: Url,
    /// App client id registered with the auth provider.
    pub client_id: String,
}

impl CloudEndpoints {
    pub const DEFAULT_AUTH_URL: &'static str = "https://cognito-idp.us-west-2.amazonaws.com/";
    pub const DEFAULT_API_URL: &'static str =
        "https://1ywgyc65d1.execute-api.us-west-2.amazonaws.com/prod";
    pub const DEFAULT_CLIENT_ID: &'static str = "2fuohjtqv1e63dckp5v84rau0j";

    /// Endpoints with both hosts pointed at one base URL (mock servers).
    pub fn single_host(base: &str) -> Result<Self, Error> {
        Ok(Self {
            auth_url: Url::parse(base)?,
            api_url: Url::parse(base)?,
            client_id: Self::DEFAULT_CLIENT_ID.into(),
        })
    }
}

impl Default for CloudEndpoints {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            auth_url: Url::parse(Self::DEFAULT_AUTH_URL).expect("static auth URL"),
            api_url: Url::parse(Self::DEFAULT_API_URL).expect("static API URL"),
            client_id: Self::DEFAULT_CLIENT_ID.into(),
        }
    }
}

/// Raw HTTP client for the grill cloud.
///
/// Stateless with respect to credentials: every authenticated call takes
/// the access token explicitly, so token lifetime is owned by the caller.
pub struct CloudClient {
    pub(crate) http: reqwest::Client,
    pub(crate) endpoints: CloudEndpoints,
}

impl CloudClient {
    /// Create a new client from a `TransportConfig`.
    pub fn new(endpoints: CloudEndpoints, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, endpoints })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoints: CloudEndpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &CloudEndpoints {
        &self.endpoints
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL below the REST API root.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/{}",
            self.endpoints.api_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List the devices registered to the account (`GET /users/self`).
    pub async fn list_things(&self, token: &str) -> Result<Vec<Thing>, Error> {
        let url = self.api_url("users/self")?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await?;

        let user: UserSelf = Self::parse_json(resp).await?;
        Ok(user.things)
    }

    /// Post a command code to a device. Fire-and-forget: the device's
    /// reaction, if any, arrives later on the MQTT update topic.
    pub async fn send_command(
        &self,
        token: &str,
        thing_id: &str,
        command: &str,
    ) -> Result<(), Error> {
        let url = self.api_url(&format!("things/{thing_id}/commands"))?;
        debug!(thing_id, command, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-us")
            .json(&CommandRequest { command })
            .send()
            .await?;

        Self::check_status(resp).await.map(drop)
    }

    /// Request a pre-signed MQTT-over-WebSocket URL (`POST /mqtt-connections`).
    pub async fn create_mqtt_connection(&self, token: &str) -> Result<MqttConnection, Error> {
        let url = self.api_url("mqtt-connections")?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await?;

        Self::parse_json(resp).await
    }

    // ── Response helpers ─────────────────────────────────────────────

    /// Map non-success statuses into `Error`, passing successful
    /// responses through untouched.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::TokenRejected);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub(crate) async fn parse_json<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    pub(crate) fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(value).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })
    }
}
