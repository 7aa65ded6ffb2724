//! Error types for the AgriHub AI search core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the AI search subsystem.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SearchError {
    /// Backend/network failure surfaced by the stream transport.
    /// Terminal for the current turn.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A second turn was started for a conversation id whose previous
    /// turn has not been finalized or cleared. Caller misuse; fails fast.
    #[error("Conversation '{id}' already has an active turn")]
    DuplicateActiveTurn { id: String },

    /// Persistence layer failure. Reported, never fatal to a streamed answer.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a DuplicateActiveTurn error
    pub fn duplicate_active_turn(id: impl Into<String>) -> Self {
        Self::DuplicateActiveTurn { id: id.into() }
    }

    /// Creates a Persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a Transport error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a DuplicateActiveTurn error
    pub fn is_duplicate_active_turn(&self) -> bool {
        matches!(self, Self::DuplicateActiveTurn { .. })
    }

    /// Check if this is a Persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<std::io::Error> for SearchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for SearchError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, SearchError>`.
pub type Result<T> = std::result::Result<T, SearchError>;
