// src/error.rs
// module: crate-root | role: error-types
// Unified error taxonomy for the agent execution engine (§4.9, §7 of SPEC_FULL.md).

use thiserror::Error;

/// Crate-wide error type. One variant per failure domain from the error taxonomy.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("perception error: {0}")]
    Perception(String),

    #[error("planning error: {0}")]
    Planning(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn perception(msg: impl Into<String>) -> Self {
        Self::Perception(msg.into())
    }

    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Persistence(err.to_string())
    }
}

impl From<image::ImageError> for AgentError {
    fn from(err: image::ImageError) -> Self {
        AgentError::Perception(err.to_string())
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

/// Crate-wide result alias.
pub type AgentResult<T> = Result<T, AgentError>;
