//! Login and token refresh calls
//!
//! Handles the two session endpoint interactions:
//! 1. Login with username/password (initial credential)
//! 2. Refresh with the refresh token (replacement credential)
//!
//! Both POST JSON to paths under the API base URL and return the same token
//! response shape. `TokenApi` abstracts the pair so the session client can
//! be driven by test doubles.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{Credential, now_millis};
use crate::error::{Error, Result};

/// Response from the login and refresh endpoints.
///
/// `expires_in` is a delta in seconds from the response time. Field names are
/// accepted in both snake_case and camelCase. `refresh_token` may be omitted
/// by servers that do not rotate refresh tokens.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(alias = "expiresIn")]
    pub expires_in: u64,
}

impl TokenResponse {
    /// Convert to a stored credential with an absolute expiry.
    ///
    /// When the response carries no refresh token, `previous_refresh` is kept.
    pub fn into_credential(self, previous_refresh: Option<&str>) -> Result<Credential> {
        let refresh_token = match (self.refresh_token, previous_refresh) {
            (Some(rt), _) if !rt.is_empty() => rt,
            (_, Some(prev)) => prev.to_string(),
            _ => {
                return Err(Error::TokenExchange(
                    "token response has no refresh token".into(),
                ));
            }
        };
        Ok(Credential {
            access_token: self.access_token,
            refresh_token,
            expires_at: now_millis().saturating_add(self.expires_in.saturating_mul(1000)),
        })
    }
}

/// Username/password pair for the login endpoint.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: Secret<String>,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<Secret<String>>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Log in with username and password.
pub async fn login(
    client: &reqwest::Client,
    url: &str,
    credentials: &LoginCredentials,
) -> Result<TokenResponse> {
    let body = serde_json::json!({
        "username": credentials.username,
        "password": credentials.password.expose(),
    });
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    read_token_response(response, "login").await
}

/// Obtain a new access token using a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    url: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .json(&serde_json::json!({ "refreshToken": refresh }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    read_token_response(response, "refresh").await
}

/// Map endpoint status to the error taxonomy and parse the body.
///
/// 401/403: credentials rejected. 429/5xx: transient server trouble.
/// Other non-success: the exchange itself is broken.
async fn read_token_response(response: reqwest::Response, call: &str) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        return Err(match status.as_u16() {
            401 | 403 => Error::InvalidCredentials(format!("{call} rejected ({status}): {body}")),
            429 | 500..=599 => Error::Http(format!("{call} endpoint returned {status}: {body}")),
            _ => Error::TokenExchange(format!("{call} endpoint returned {status}: {body}")),
        });
    }

    let parsed = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {call} response: {e}")))?;
    debug!(call, expires_in = parsed.expires_in, "token endpoint succeeded");
    Ok(parsed)
}

/// The session endpoints, as the session client sees them.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenApi>`).
pub trait TokenApi: Send + Sync {
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

/// `TokenApi` over HTTP against fixed login and refresh URLs.
#[derive(Debug, Clone)]
pub struct HttpTokenApi {
    client: reqwest::Client,
    login_url: String,
    refresh_url: String,
}

impl HttpTokenApi {
    pub fn new(
        client: reqwest::Client,
        login_url: impl Into<String>,
        refresh_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            login_url: login_url.into(),
            refresh_url: refresh_url.into(),
        }
    }
}

impl TokenApi for HttpTokenApi {
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(login(&self.client, &self.login_url, credentials))
    }

    fn refresh<'a>(
        &'a self,
        refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(refresh_token(&self.client, &self.refresh_url, refresh))
    }
}
