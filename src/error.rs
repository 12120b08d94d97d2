//! Error types for the local state store
//!
//! Provides unified error handling using thiserror.

use std::io;

use thiserror::Error;

// == State Error Enum ==
/// Unified error type for the local state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// Malformed key or path argument
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// Filesystem failure while provisioning, reading, writing or removing
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Persisted payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value could not be encoded for persistence
    #[error("Encode error: {0}")]
    Encode(String),

    /// Internal invariant violated
    #[error("Programming error: {0}")]
    Programming(String),
}

impl StateError {
    /// Wraps an io::Error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StateError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true for argument validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, StateError::Validation(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the local state store.
pub type Result<T> = std::result::Result<T, StateError>;
