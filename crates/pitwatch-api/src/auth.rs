// Username/password exchange against the cloud's auth provider.
//
// One POST with the `USER_PASSWORD_AUTH` flow returns an id token and
// its lifetime. Refresh tokens are ignored: the bridge simply repeats
// the exchange when the id token nears expiry.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::client::CloudClient;
use crate::error::Error;
use crate::models::{
    AuthErrorBody, AuthParameters, AuthenticationResult, InitiateAuthRequest, InitiateAuthResponse,
};

const AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AUTH_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

impl CloudClient {
    /// Exchange account credentials for an access token.
    pub async fn initiate_auth(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticationResult, Error> {
        let url = self.endpoints.auth_url.clone();
        debug!(username, "POST {} (InitiateAuth)", url);

        let body = Self::json_body(&InitiateAuthRequest {
            auth_flow: "USER_PASSWORD_AUTH",
            client_id: &self.endpoints.client_id,
            auth_parameters: AuthParameters {
                username,
                password: password.expose_secret(),
            },
            client_metadata: serde_json::Map::new(),
        })?;

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, AUTH_CONTENT_TYPE)
            .header("X-Amz-Target", AUTH_TARGET)
            .header("X-Amz-Date", Utc::now().format("%Y%m%dT%H%M%SZ").to_string())
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<AuthErrorBody>(&text)
                .ok()
                .and_then(|e| e.message.or(e.kind))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(Error::Authentication { message });
        }

        let parsed: InitiateAuthResponse =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.clone(),
            })?;

        parsed
            .authentication_result
            .ok_or_else(|| Error::Authentication {
                message: "auth provider answered with a challenge instead of tokens".into(),
            })
    }
}
