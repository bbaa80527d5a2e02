//! Authenticated request layer
//!
//! Every resource call goes through [`ApiRequester::call`], which obtains a
//! valid token, builds the headers, places the payload (query string for
//! GET, form body otherwise) and normalizes the response into an
//! [`Envelope`].

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use testdroid_core::{Envelope, Payload, Result, TestdroidError};
use tracing::{debug, warn};

use crate::auth::TokenManager;

/// Path prefix of all resource endpoints.
pub const API_PREFIX: &str = "api/v2";

/// Join a base url and a relative path with exactly one slash between
/// every pair of segments.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Optional parts of a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub payload: Payload,
    pub headers: BTreeMap<String, String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(payload: Payload) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Build the header set for one request.
///
/// Caller headers override the defaults, except `Authorization`, which is
/// always the bearer value passed in here.
pub fn build_headers(
    access_token: &str,
    user_agent: &str,
    extra: &BTreeMap<String, String>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|_| TestdroidError::InvalidInput(format!("Invalid user agent: {}", user_agent)))?,
    );

    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TestdroidError::InvalidInput(format!("Invalid header name: {}", name)))?;
        if header_name == AUTHORIZATION {
            continue;
        }
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            TestdroidError::InvalidInput(format!("Invalid value for header {}", name))
        })?;
        headers.insert(header_name, header_value);
    }

    let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|_| TestdroidError::Auth("access token is not a valid header value".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);

    Ok(headers)
}

/// Issues authenticated calls against `<base>/api/v2/`.
#[derive(Debug)]
pub struct ApiRequester {
    http: Client,
    api_url: String,
    user_agent: String,
    tokens: TokenManager,
}

impl ApiRequester {
    pub fn new(http: Client, user_agent: String, tokens: TokenManager) -> Self {
        let api_url = join_url(&tokens.credentials().base_url, API_PREFIX);
        Self {
            http,
            api_url,
            user_agent,
            tokens,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Perform one authenticated call.
    ///
    /// Blocks on token issue/refresh first. A completed exchange always
    /// yields an [`Envelope`], whatever the status; only a failure to
    /// complete the exchange is an error. Nothing is retried here.
    pub async fn call(&self, method: Method, path: &str, options: RequestOptions) -> Result<Envelope> {
        let access_token = self.tokens.access_token(&self.http).await?;
        let headers = build_headers(&access_token, &self.user_agent, &options.headers)?;
        let url = join_url(&self.api_url, path);
        let pairs = options.payload.to_pairs();

        debug!("{} /{} with {} payload fields", method, path.trim_start_matches('/'), pairs.len());

        let request = self.http.request(method.clone(), &url).headers(headers);
        let request = if method == Method::GET {
            request.query(&pairs)
        } else {
            request.form(&pairs)
        };

        let response = request.send().await.map_err(|e| TestdroidError::Transport {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TestdroidError::Transport {
            endpoint: path.to_string(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        let envelope = Envelope::from_parts(status.as_u16(), status.canonical_reason(), &text);
        if !envelope.ok {
            warn!(
                "{} /{} returned HTTP {}: {}",
                method,
                path.trim_start_matches('/'),
                envelope.status,
                envelope.error.as_deref().unwrap_or_default()
            );
        }

        Ok(envelope)
    }

    pub async fn get(&self, path: &str, payload: Payload) -> Result<Envelope> {
        self.call(Method::GET, path, RequestOptions::payload(payload))
            .await
    }

    pub async fn post(&self, path: &str, payload: Payload) -> Result<Envelope> {
        self.call(Method::POST, path, RequestOptions::payload(payload))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Envelope> {
        self.call(Method::DELETE, path, RequestOptions::new()).await
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}
