//! Error types for the Testdroid client

use thiserror::Error;

/// Core error type for Testdroid Cloud API operations
#[derive(Error, Debug)]
pub enum TestdroidError {
    /// The authorization endpoint rejected a password or refresh grant
    #[error("Could not retrieve token: {0}")]
    Auth(String),

    /// The HTTP exchange could not be completed (DNS, refused, timeout)
    #[error("Could not complete request to {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// A resource call returned a non-success status
    #[error("{operation} failed with HTTP {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    /// A bounded poll ran out of attempts without an acceptable result
    #[error("Timed out waiting for {resource} after {attempts} attempts")]
    PollTimeout { resource: String, attempts: u32 },

    /// A lookup by name yielded no match
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TestdroidError {
    /// Build a [`TestdroidError::NotFound`] for the given resource kind.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        TestdroidError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, TestdroidError::Auth(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, TestdroidError::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TestdroidError::NotFound { .. })
    }

    pub fn is_poll_timeout(&self) -> bool {
        matches!(self, TestdroidError::PollTimeout { .. })
    }

    /// HTTP status of a rejected resource call, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TestdroidError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for Testdroid operations
pub type Result<T> = std::result::Result<T, TestdroidError>;

impl From<serde_json::Error> for TestdroidError {
    fn from(err: serde_json::Error) -> Self {
        TestdroidError::Serialization(err.to_string())
    }
}
