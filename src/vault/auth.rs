//! Auth Token Client for the vault identity service.
//!
//! Performs an OAuth2 client-credentials grant and returns a short-lived
//! [`VaultCredential`]. Credentials are fetched fresh for every use and never cached.
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), vault_handoff::vault::AuthError> {
//! use secrecy::SecretString;
//! use vault_handoff::vault::{AuthTokenClient, ServiceCredentials};
//!
//! let client = AuthTokenClient::new(
//!     "https://auth.verygoodsecurity.com/auth/realms/vgs/protocol/openid-connect/token"
//!         .parse()
//!         .unwrap(),
//! );
//! let credentials = ServiceCredentials::new("ACxxxx", SecretString::from("secret".to_string()));
//! let credential = client.fetch(&credentials).await?;
//! # Ok(())
//! # }
//! ```

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;
use vault_handoff_types::flow::ErrorKind;
use vault_handoff_types::timestamp::UnixTimestamp;

/// Service-account credentials for the vault identity service.
#[derive(Debug)]
pub struct ServiceCredentials {
    client_id: String,
    client_secret: SecretString,
}

impl ServiceCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// A short-lived access token issued by the vault identity service.
#[derive(Debug)]
pub struct VaultCredential {
    access_token: SecretString,
    token_type: String,
    expires_at: Option<UnixTimestamp>,
}

impl VaultCredential {
    pub fn new(
        access_token: SecretString,
        token_type: impl Into<String>,
        expires_at: Option<UnixTimestamp>,
    ) -> Self {
        Self {
            access_token,
            token_type: token_type.into(),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_at(&self) -> Option<UnixTimestamp> {
        self.expires_at
    }

    /// A credential without an expiry is treated as valid.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= UnixTimestamp::now())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Errors that can occur while exchanging service credentials for a vault credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Service credentials are incomplete: {0} is empty")]
    MissingCredential(&'static str),
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Token response carries no access_token: {context}")]
    MissingAccessToken { context: &'static str },
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Auth
    }
}

/// Client for the vault identity service token endpoint.
#[derive(Clone, Debug)]
pub struct AuthTokenClient {
    client: Client,
    token_url: Url,
    timeout: Option<Duration>,
}

impl AuthTokenClient {
    const CONTEXT: &'static str = "POST token";

    pub fn new(token_url: Url) -> Self {
        Self {
            client: Client::new(),
            token_url,
            timeout: None,
        }
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// Exchanges `credentials` for a fresh [`VaultCredential`].
    ///
    /// No request is issued when either credential is blank. There is no retry.
    #[instrument(
        name = "vault.auth.fetch",
        skip_all,
        err,
        fields(client_id = %credentials.client_id, timeout = ?self.timeout)
    )]
    pub async fn fetch(
        &self,
        credentials: &ServiceCredentials,
    ) -> Result<VaultCredential, AuthError> {
        if credentials.client_id.trim().is_empty() {
            return Err(AuthError::MissingCredential("client_id"));
        }
        if credentials.client_secret.expose_secret().trim().is_empty() {
            return Err(AuthError::MissingCredential("client_secret"));
        }

        let context = Self::CONTEXT;
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
        ];
        let mut req = self.client.post(self.token_url.clone()).form(&params);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| AuthError::Http { context, source: e.without_url() })?;

        let status = http_response.status();
        if !status.is_success() {
            tracing::warn!(%status, "Vault identity service refused the credentials");
            return Err(AuthError::HttpStatus { context, status });
        }

        let body = http_response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::JsonDeserialization { context, source: e.without_url() })?;
        let access_token = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingAccessToken { context })?;
        let expires_at = body.expires_in.map(|secs| UnixTimestamp::now() + secs);

        tracing::debug!(expires_at = ?expires_at, "Vault credential issued");
        Ok(VaultCredential::new(
            SecretString::from(access_token),
            body.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> ServiceCredentials {
        ServiceCredentials::new("svc-client", SecretString::from("svc-secret".to_string()))
    }

    fn client(server: &MockServer) -> AuthTokenClient {
        AuthTokenClient::new(format!("{}/token", server.uri()).parse().unwrap())
    }

    #[tokio::test]
    async fn test_fetch_posts_client_credentials_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=svc-client"))
            .and(body_string_contains("client_secret=svc-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "vault-token",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = client(&server).fetch(&credentials()).await.unwrap();
        assert_eq!(credential.access_token(), "vault-token");
        assert_eq!(credential.token_type(), "Bearer");
        assert!(credential.expires_at().is_some());
        assert!(!credential.is_expired());
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).fetch(&credentials()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::HttpStatus {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!err.to_string().contains("svc-secret"));
    }

    #[tokio::test]
    async fn test_fetch_requires_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let err = client(&server).fetch(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingAccessToken { .. }));
    }

    #[tokio::test]
    async fn test_fetch_skips_call_on_blank_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let blank = ServiceCredentials::new("svc-client", SecretString::from(" ".to_string()));
        let err = client(&server).fetch(&blank).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential("client_secret")));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "late" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .with_timeout(Duration::from_millis(50))
            .fetch(&credentials())
            .await
            .unwrap_err();
        assert!(!err.to_string().contains(&server.uri()));
        match err {
            AuthError::Http { source, .. } => assert!(source.is_timeout()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_expired_credential() {
        let expired = VaultCredential::new(
            SecretString::from("t".to_string()),
            "Bearer",
            Some(UnixTimestamp::from_secs(1)),
        );
        assert!(expired.is_expired());
        let open_ended = VaultCredential::new(SecretString::from("t".to_string()), "Bearer", None);
        assert!(!open_ended.is_expired());
    }
}
