//! Error types for the hawkBit agent

use thiserror::Error;

/// Main error type for the hawkBit agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP request failed: {status}; server response: {body}")]
    Http { status: u16, body: String },

    #[error("Deployment {0} is already in progress.")]
    AlreadyInProgress(String),

    #[error("{0}")]
    ResponseParse(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Invalid checksum: {computed} expected {expected}")]
    Checksum { computed: String, expected: String },

    #[error("Not enough free space. File size: {needed}. Free space: {available}")]
    NoSpace { needed: u64, available: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// HTTP status carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AgentError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
