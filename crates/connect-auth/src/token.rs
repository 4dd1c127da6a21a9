//! Refresh-token exchange
//!
//! POSTs `grant_type=refresh_token` to `<signin_url>/oauth2/token`,
//! authenticating the client with HTTP Basic (`client_id:client_secret`).
//! The token endpoint lives on the sign-in host, not the API host.

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{BASIC_SCHEME, DEFAULT_TOKEN_TYPE, GRANT_TYPE_REFRESH, TOKEN_PATH};
use crate::credentials::Credential;
use crate::error::RefreshError;

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time. Only
/// `access_token` is mandatory; a missing `refresh_token` means the server did
/// not rotate it.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Fold this response into the credential it replaces.
    ///
    /// The previous refresh token and token type are kept when the response
    /// leaves them out.
    pub fn into_credential(self, previous: &Credential, now_millis: i64) -> Credential {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| previous.refresh_token.clone());
        let token_type = self
            .token_type
            .filter(|t| !t.is_empty())
            .or_else(|| Some(previous.token_type.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        let expires_at = if self.expires_in == 0 {
            0
        } else {
            let secs = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
            now_millis.saturating_add(secs.saturating_mul(1000))
        };

        Credential {
            access_token: self.access_token,
            refresh_token,
            token_type,
            expires_at,
        }
    }
}

/// OAuth client identity for the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: Secret<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: Secret<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `Basic base64(client_id:client_secret)` header value.
    pub fn basic_authorization(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret.expose());
        format!("{BASIC_SCHEME} {}", STANDARD.encode(raw))
    }
}

/// Performs the refresh-token exchange.
///
/// Uses `Pin<Box<dyn Future>>` so the coordinator can hold an
/// `Arc<dyn TokenRefreshClient>` and tests can substitute scripted clients.
pub trait TokenRefreshClient: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse, RefreshError>> + Send + 'a>>;
}

/// [`TokenRefreshClient`] backed by reqwest.
pub struct HttpTokenRefreshClient {
    client: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
}

impl HttpTokenRefreshClient {
    /// `signin_url` is the environment's sign-in base URL; the token path is
    /// appended to it.
    pub fn new(client: reqwest::Client, signin_url: &str, credentials: ClientCredentials) -> Self {
        Self {
            client,
            token_url: format!("{}{TOKEN_PATH}", signin_url.trim_end_matches('/')),
            credentials,
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let response = self
            .client
            .post(&self.token_url)
            .header(
                reqwest::header::AUTHORIZATION,
                self.credentials.basic_authorization(),
            )
            .form(&[
                ("grant_type", GRANT_TYPE_REFRESH),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| RefreshError::Generic(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            debug!(status = status.as_u16(), "token endpoint returned an error");

            return Err(match status.as_u16() {
                400 => RefreshError::InvalidRequest,
                401 => RefreshError::Unauthorized,
                500 => RefreshError::ServerError,
                _ => RefreshError::Generic(format!("token endpoint returned {status}: {body}")),
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::Generic(format!("invalid refresh response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(RefreshError::Generic(
                "refresh response carried an empty access_token".into(),
            ));
        }
        Ok(token)
    }
}

impl TokenRefreshClient for HttpTokenRefreshClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse, RefreshError>> + Send + 'a>> {
        Box::pin(self.exchange(refresh_token))
    }
}
