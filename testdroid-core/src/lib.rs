//! Testdroid Core Library
//!
//! Shared types, wire models and errors for the Testdroid Cloud API client.
//! This crate holds no network code; `testdroidctl` builds the client on top.

pub mod api;
pub mod capabilities;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use api::{Envelope, Page, Payload, PayloadValue};
pub use capabilities::{label_lookups, Capabilities, LabelLookup};
pub use error::*;
pub use types::*;
