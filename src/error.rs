//! Error types shared across the load generator.

use crate::controller::ControllerState;
use thiserror::Error;

/// Outcome of a failed external API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The call failed before any response was obtained
    #[error("transport error: {0}")]
    Transport(String),

    /// A response was obtained but its status indicates failure
    #[error("application error: HTTP status {status}")]
    Application { status: u16 },
}

/// Fatal conditions surfaced at start-up or when emitting the final report.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("rate controller is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: ControllerState,
        actual: ControllerState,
    },

    #[error("report upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        LoadError::InvalidConfig(message.into())
    }
}
