//! Resource models returned by the Testdroid Cloud API
//!
//! Every entity carries its well-known fields explicitly and keeps whatever
//! else the server sent in an `extra` map, so newer server fields survive a
//! round trip through the client without code changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TestdroidError;

/// Server-supplied attributes without a dedicated field.
pub type Extra = Map<String, Value>;

/// A device model known to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A key/value property attached to a device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProperty {
    pub id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub property_group_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Named group of labels, e.g. "Build Identifier".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelGroup {
    pub id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl LabelGroup {
    /// Case-insensitive match against the display name or the internal name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.display_name.eq_ignore_ascii_case(name)
            || self
                .name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }
}

/// A label inside a [`LabelGroup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub label_group_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub project_type: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One execution of a project's test suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: i64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl TestRun {
    pub const STATE_FINISHED: &'static str = "FINISHED";

    pub fn is_finished(&self) -> bool {
        self.state.as_deref() == Some(Self::STATE_FINISHED)
    }
}

/// A configuration parameter of a test run (`key=value`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunParameter {
    pub id: i64,
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Exclusive allocation of a device to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Protocol brokered by the proxy plugin for an active device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Adb,
    Marionette,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Adb => "adb",
            ProxyType::Marionette => "marionette",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = TestdroidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adb" => Ok(ProxyType::Adb),
            "marionette" => Ok(ProxyType::Marionette),
            other => Err(TestdroidError::InvalidInput(format!(
                "Unknown proxy type '{}'. Must be 'adb' or 'marionette'",
                other
            ))),
        }
    }
}

/// Connection endpoint of a provisioned proxy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySession {
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub session_id: i64,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ProxySession {
    /// `host:port` when both parts are known.
    pub fn address(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
            _ => None,
        }
    }
}
