//! Testdroid Cloud client library
//!
//! This library provides authenticated access to the Testdroid Cloud API and
//! the functionality behind the `testdroidctl` CLI tool.
//!
//! # Public API
//!
//! The primary public API is the [`client::TestdroidClient`], which handles
//! OAuth token issue and refresh transparently and exposes typed operations
//! for devices, labels, projects, test runs, device sessions and proxies.
//! Configuration types for the CLI are available via [`config::CliConfig`]
//! and [`config::ConfigBuilder`].
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use testdroidctl::client::TestdroidClient;
//!
//! # async fn example() -> testdroid_core::Result<()> {
//! let client = TestdroidClient::new("https://cloud.testdroid.com", "user", "secret")?;
//!
//! let mut capabilities = BTreeMap::new();
//! capabilities.insert("type".to_string(), "flame".to_string());
//! capabilities.insert("memory".to_string(), "512".to_string());
//!
//! for device in client.get_devices(Some(&capabilities), None).await? {
//!     println!("{} ({})", device.display_name, device.id);
//! }
//! # Ok(())
//! # }
//! ```

/// OAuth token lifecycle.
pub mod auth;

/// Typed operations against the cloud API.
pub mod client;

/// Configuration types for the CLI tool.
pub mod config;

/// Bounded polling helper.
pub mod poll;

/// Authenticated request layer and response normalization.
pub mod request;

// Internal CLI implementation - not part of public API
#[doc(hidden)]
pub mod cli;

// Internal formatting functions - not part of public API
#[doc(hidden)]
pub mod format;

#[cfg(test)]
pub mod test_utils;

pub use client::{ClientOptions, TestdroidClient};
