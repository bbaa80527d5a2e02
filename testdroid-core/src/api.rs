//! Wire models for the Testdroid Cloud API
//!
//! Request payloads, the uniform response envelope, list pages and the
//! OAuth token exchange.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Result, TestdroidError};

/// A single payload value: a scalar or a repeated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    Scalar(String),
    List(Vec<String>),
}

macro_rules! scalar_from {
    ($($t:ty),*) => {
        $(impl From<$t> for PayloadValue {
            fn from(v: $t) -> Self {
                PayloadValue::Scalar(v.to_string())
            }
        })*
    };
}

scalar_from!(&str, String, &String, i64, u32, u64, usize, bool);

impl<T: ToString> From<Vec<T>> for PayloadValue {
    fn from(values: Vec<T>) -> Self {
        PayloadValue::List(values.iter().map(ToString::to_string).collect())
    }
}

/// Request payload: query string for GET, form body otherwise.
///
/// Keys are kept sorted so the encoded form is deterministic. List values
/// expand into one pair per element under the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into `(key, value)` pairs ready for url encoding.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.0 {
            match value {
                PayloadValue::Scalar(v) => pairs.push((key.clone(), v.clone())),
                PayloadValue::List(values) => {
                    pairs.extend(values.iter().map(|v| (key.clone(), v.clone())));
                }
            }
        }
        pairs
    }
}

/// Uniform result of an authenticated call.
///
/// Produced for every completed HTTP exchange, whether the server accepted
/// the request or not. Transport failures never produce an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub ok: bool,
    pub status: u16,
    /// Parsed JSON body, if the server sent any.
    pub body: Option<Value>,
    /// Status text or server-provided description on failure.
    pub error: Option<String>,
}

impl Envelope {
    /// Build an envelope from a status code and the raw response text.
    pub fn from_parts(status: u16, reason: Option<&str>, text: &str) -> Self {
        let ok = (200..300).contains(&status);
        let body = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<Value>(text).ok()
        };

        let error = if ok {
            None
        } else {
            let detail = body.as_ref().and_then(server_message).or_else(|| {
                let trimmed = text.trim();
                (!trimmed.is_empty() && body.is_none()).then(|| trimmed.to_string())
            });
            Some(detail.unwrap_or_else(|| reason.unwrap_or("Unknown error").to_string()))
        };

        Self {
            ok,
            status,
            body,
            error,
        }
    }

    /// Return the body on success or an [`TestdroidError::Api`] naming `operation`.
    pub fn into_body(self, operation: &str) -> Result<Value> {
        if !self.ok {
            return Err(TestdroidError::Api {
                operation: operation.to_string(),
                status: self.status,
                message: self.error.unwrap_or_default(),
            });
        }
        Ok(self.body.unwrap_or(Value::Null))
    }

    /// Return the body deserialized as `T`.
    pub fn into_json<T: DeserializeOwned>(self, operation: &str) -> Result<T> {
        let body = self.into_body(operation)?;
        serde_json::from_value(body).map_err(|e| {
            TestdroidError::Serialization(format!("{}: unexpected response: {}", operation, e))
        })
    }

    /// Succeed or fail without looking at the body.
    pub fn ensure_ok(self, operation: &str) -> Result<()> {
        self.into_body(operation).map(|_| ())
    }
}

/// Pull the human-readable message out of a JSON error body.
fn server_message(body: &Value) -> Option<String> {
    ["message", "error_description", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// A page of a list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Successful `oauth/token` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Rejected `oauth/token` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    pub fn describe(&self) -> String {
        self.error_description
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "no error description".to_string())
    }
}
