// ── Credential lifecycle ──
//
// Owns the access token and the signed MQTT endpoint. Each is refreshed
// lazily and independently when it comes within `REFRESH_SKEW_SECS` of expiry.
// Concurrent callers that find a stale value queue behind a single
// in-flight refresh and reuse its result.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use pitwatch_api::CloudClient;

use crate::config::AccountCredentials;
use crate::error::CoreError;
use crate::model::{Credential, Expiring, SignedEndpoint};

/// Refresh when less than this many seconds of lifetime remain.
pub const REFRESH_SKEW_SECS: i64 = 60;

/// A value guarded by a freshness check with a single-flight refresh.
struct Lease<T> {
    current: RwLock<Option<T>>,
    refresh: Mutex<()>,
}

impl<T: Expiring + Clone> Lease<T> {
    fn new() -> Self {
        Self {
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn fresh(&self) -> Option<T> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|v| v.is_fresh(Utc::now(), Duration::seconds(REFRESH_SKEW_SECS)))
            .cloned()
    }

    async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        if let Some(value) = self.fresh().await {
            return Ok(value);
        }

        let _guard = self.refresh.lock().await;
        // Whoever held the lock before us may have refreshed already.
        if let Some(value) = self.fresh().await {
            return Ok(value);
        }

        // Only a successful refresh replaces the stored value.
        let value = refresh().await?;
        *self.current.write().await = Some(value.clone());
        Ok(value)
    }

    async fn stored(&self) -> Option<T> {
        self.current.read().await.clone()
    }

    async fn clear(&self) {
        *self.current.write().await = None;
    }
}

/// Token and signed-endpoint owner for one account.
pub struct CredentialManager {
    client: Arc<CloudClient>,
    account: AccountCredentials,
    token: Lease<Credential>,
    endpoint: Lease<SignedEndpoint>,
}

impl CredentialManager {
    pub fn new(client: Arc<CloudClient>, account: AccountCredentials) -> Self {
        Self {
            client,
            account,
            token: Lease::new(),
            endpoint: Lease::new(),
        }
    }

    /// A token valid for at least the refresh skew, exchanging the
    /// account credentials if needed.
    ///
    /// A failed exchange keeps the previous credential and surfaces
    /// [`CoreError::Auth`]; the next call tries again.
    pub async fn token(&self) -> Result<Credential, CoreError> {
        self.token
            .get_or_refresh(|| async {
                let requested_at = Utc::now();
                let result = self
                    .client
                    .initiate_auth(&self.account.username, &self.account.password)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "access token refresh failed");
                        CoreError::Auth {
                            message: e.to_string(),
                        }
                    })?;

                let credential = Credential {
                    access_token: SecretString::from(result.id_token),
                    expires_at: requested_at + Duration::seconds(result.expires_in),
                };
                info!(expires_at = %credential.expires_at, "access token refreshed");
                Ok::<_, CoreError>(credential)
            })
            .await
    }

    /// A pre-signed MQTT endpoint valid for at least the refresh skew.
    /// Obtains a valid token first.
    pub async fn signed_endpoint(&self) -> Result<SignedEndpoint, CoreError> {
        self.endpoint
            .get_or_refresh(|| async {
                let token = self.token().await?;
                let requested_at = Utc::now();
                let conn = match self
                    .client
                    .create_mqtt_connection(token.access_token.expose_secret())
                    .await
                {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "signed endpoint refresh failed");
                        self.note_failure(&e).await;
                        return Err(CoreError::from(e));
                    }
                };

                let endpoint = SignedEndpoint {
                    url: SecretString::from(conn.signed_url),
                    expires_at: requested_at + Duration::seconds(conn.expiration_seconds),
                };
                debug!(expires_at = %endpoint.expires_at, "signed endpoint refreshed");
                Ok::<_, CoreError>(endpoint)
            })
            .await
    }

    /// Forget the token after the API rejected it, so the next access
    /// performs a fresh exchange.
    pub async fn invalidate_token(&self) {
        self.token.clear().await;
    }

    /// React to an API failure: a rejected token is dropped.
    pub(crate) async fn note_failure(&self, err: &pitwatch_api::Error) {
        if matches!(err, pitwatch_api::Error::TokenRejected) {
            debug!("token rejected by API, invalidating");
            self.invalidate_token().await;
        }
    }

    /// The stored token regardless of freshness.
    pub async fn stored_token(&self) -> Option<Credential> {
        self.token.stored().await
    }

    pub fn client(&self) -> &Arc<CloudClient> {
        &self.client
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use pitwatch_api::CloudEndpoints;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_ok(token: &str, expires_in: i64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": { "IdToken": token, "ExpiresIn": expires_in }
        }))
    }

    fn manager(server: &MockServer) -> CredentialManager {
        let endpoints = CloudEndpoints::single_host(&server.uri()).unwrap();
        let client = Arc::new(CloudClient::with_client(reqwest::Client::new(), endpoints));
        CredentialManager::new(
            client,
            AccountCredentials {
                username: "cook@example.com".into(),
                password: SecretString::from("pw"),
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(auth_ok("tok-1", 3600))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Arc::new(manager(&server));
        let calls = (0..8).map(|_| {
            let creds = Arc::clone(&creds);
            async move { creds.token().await }
        });
        let results = join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap().access_token.expose_secret(), "tok-1");
        }
    }

    #[tokio::test]
    async fn fresh_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(auth_ok("tok-1", 3600))
            .expect(1)
            .mount(&server)
            .await;

        let creds = manager(&server);
        creds.token().await.unwrap();
        creds.token().await.unwrap();
    }

    #[tokio::test]
    async fn token_inside_skew_is_refreshed() {
        let server = MockServer::start().await;
        // 30s of lifetime is already inside the 60s skew.
        Mock::given(method("POST"))
            .respond_with(auth_ok("short", 30))
            .expect(2)
            .mount(&server)
            .await;

        let creds = manager(&server);
        creds.token().await.unwrap();
        creds.token().await.unwrap();
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(auth_ok("old", 30))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "NotAuthorizedException",
                "message": "Password attempts exceeded"
            })))
            .mount(&server)
            .await;

        let creds = manager(&server);
        creds.token().await.unwrap();

        let err = creds.token().await.unwrap_err();
        assert!(err.is_auth(), "got {err:?}");

        let kept = creds.stored_token().await.unwrap();
        assert_eq!(kept.access_token.expose_secret(), "old");
    }

    #[tokio::test]
    async fn signed_endpoint_uses_token_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(auth_ok("tok-1", 3600))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mqtt-connections"))
            .and(header("Authorization", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": "wss://broker.example.com/mqtt?sig=1",
                "expirationSeconds": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = manager(&server);
        let first = creds.signed_endpoint().await.unwrap();
        let second = creds.signed_endpoint().await.unwrap();
        assert_eq!(first.url.expose_secret(), "wss://broker.example.com/mqtt?sig=1");
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn endpoint_and_token_lifetimes_are_independent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(auth_ok("tok-1", 3600))
            .expect(1)
            .mount(&server)
            .await;
        // An endpoint that is always inside the skew forces a new signing
        // on every call while the token stays cached.
        Mock::given(method("POST"))
            .and(path("/mqtt-connections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": "wss://broker.example.com/mqtt",
                "expirationSeconds": 10
            })))
            .expect(2)
            .mount(&server)
            .await;

        let creds = manager(&server);
        creds.signed_endpoint().await.unwrap();
        creds.signed_endpoint().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_signing_drops_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(auth_ok("revoked", 3600))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(auth_ok("tok-2", 3600))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mqtt-connections"))
            .and(header("Authorization", "revoked"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mqtt-connections"))
            .and(header("Authorization", "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": "wss://broker.example.com/mqtt",
                "expirationSeconds": 3600
            })))
            .mount(&server)
            .await;

        let creds = manager(&server);
        let err = creds.signed_endpoint().await.unwrap_err();
        assert!(err.is_auth(), "got {err:?}");
        assert!(creds.stored_token().await.is_none());

        let endpoint = creds.signed_endpoint().await.unwrap();
        assert_eq!(endpoint.url.expose_secret(), "wss://broker.example.com/mqtt");
    }

    #[tokio::test]
    async fn invalidated_token_is_exchanged_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(auth_ok("tok", 3600))
            .expect(2)
            .mount(&server)
            .await;

        let creds = manager(&server);
        creds.token().await.unwrap();
        creds.note_failure(&pitwatch_api::Error::TokenRejected).await;
        assert!(creds.stored_token().await.is_none());
        creds.token().await.unwrap();
    }
}
