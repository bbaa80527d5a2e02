//! OAuth token management
//!
//! Issues and refreshes the bearer token used by every API call. The token
//! is owned by one client instance; there is no process-wide token state.

use reqwest::Client;
use std::time::Duration;
use testdroid_core::api::{OAuthErrorResponse, TokenResponse};
use testdroid_core::{Result, TestdroidError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// OAuth client id accepted by the Testdroid authorization server.
pub const DEFAULT_CLIENT_ID: &str = "testdroid-cloud-api";

/// Tokens closer than this to expiry are refreshed before use.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Account credentials, fixed for the lifetime of a client.
#[derive(Clone)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An issued bearer token.
#[derive(Clone, PartialEq)]
pub struct Token {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) expires_at: Instant,
}

impl Token {
    fn from_response(response: TokenResponse, issued_at: Instant) -> Result<Self> {
        let expires_at = issued_at
            .checked_add(Duration::from_secs(response.expires_in))
            .ok_or_else(|| {
                TestdroidError::Auth(format!(
                    "token lifetime out of range: {} seconds",
                    response.expires_in
                ))
            })?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        })
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// What [`ensure_token`] has to do with the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    /// Token is valid and not near expiry.
    Reuse,
    /// Token is valid but inside the refresh window.
    Refresh,
    /// No token, or the token has expired.
    Issue,
}

/// Decide how to obtain a usable token at `now`.
pub fn token_action(current: Option<&Token>, now: Instant, refresh_window: Duration) -> TokenAction {
    match current {
        None => TokenAction::Issue,
        Some(token) if !token.is_valid_at(now) => TokenAction::Issue,
        Some(token) if now + refresh_window >= token.expires_at => TokenAction::Refresh,
        Some(_) => TokenAction::Reuse,
    }
}

/// Settings of the token exchange.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub refresh_window: Duration,
    pub user_agent: String,
}

/// Join the base url with `oauth/token`.
pub fn token_url(base_url: &str) -> String {
    format!("{}/oauth/token", base_url.trim_end_matches('/'))
}

/// Return a token valid for use, contacting the authorization server only
/// when `current` is missing, expired or about to expire.
pub async fn ensure_token(
    http: &Client,
    credentials: &Credentials,
    settings: &AuthSettings,
    current: Option<&Token>,
) -> Result<Token> {
    let now = Instant::now();

    let form: Vec<(&str, &str)> = match (token_action(current, now, settings.refresh_window), current)
    {
        (TokenAction::Reuse, Some(token)) => {
            debug!("No need to refresh token");
            return Ok(token.clone());
        }
        (TokenAction::Refresh, Some(token)) => {
            debug!("Refreshing token");
            vec![
                ("client_id", settings.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
            ]
        }
        _ => {
            debug!("Requesting new token for {}", credentials.username);
            vec![
                ("client_id", settings.client_id.as_str()),
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ]
        }
    };

    let endpoint = token_url(&credentials.base_url);
    let response = http
        .post(&endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::USER_AGENT, settings.user_agent.as_str())
        .form(&form)
        .send()
        .await
        .map_err(|e| TestdroidError::Transport {
            endpoint: "oauth/token".to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TestdroidError::Transport {
            endpoint: "oauth/token".to_string(),
            reason: e.to_string(),
        })?;

    if !status.is_success() {
        let rejection: OAuthErrorResponse = serde_json::from_str(&text).unwrap_or_default();
        return Err(TestdroidError::Auth(format!(
            "HTTP {}: {}",
            status.as_u16(),
            rejection.describe()
        )));
    }

    let issued: TokenResponse = serde_json::from_str(&text)
        .map_err(|e| TestdroidError::Auth(format!("malformed token response: {}", e)))?;

    Token::from_response(issued, now)
}

/// Per-client owner of the token state.
///
/// The lock is held across the whole refresh, so concurrent callers sharing
/// one client wait for the single in-flight exchange and then reuse its
/// result instead of racing their own.
#[derive(Debug)]
pub struct TokenManager {
    credentials: Credentials,
    settings: AuthSettings,
    token: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(credentials: Credentials, settings: AuthSettings) -> Self {
        Self {
            credentials,
            settings,
            token: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Bearer value for the next request.
    pub async fn access_token(&self, http: &Client) -> Result<String> {
        let mut slot = self.token.lock().await;
        let token = ensure_token(http, &self.credentials, &self.settings, slot.as_ref()).await?;
        let access = token.access_token.clone();
        *slot = Some(token);
        Ok(access)
    }

    #[cfg(test)]
    pub(crate) async fn current(&self) -> Option<Token> {
        self.token.lock().await.clone()
    }
}
