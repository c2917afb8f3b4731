//! Error types for the discovery repository.
//!
//! Errors are strongly typed using thiserror so that message handlers can
//! decide per category whether a failure is dropped, logged or retried.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors for malformed inbound requests.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope {
        reason: String,
    },

    #[error("Malformed payload: {reason}")]
    MalformedPayload {
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' must not be empty")]
    EmptyField {
        field: String,
    },

    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter {
        filter: String,
        reason: String,
    },
}

/// Execution errors that occur while serving a request.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Queue '{queue}' is full")]
    QueueFull {
        queue: String,
    },
}

/// Transport errors for broker communication.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish to '{topic}' failed: {message}")]
    PublishFailed {
        topic: String,
        message: String,
    },

    #[error("Subscription to '{filter}' failed: {message}")]
    SubscribeFailed {
        filter: String,
        message: String,
    },

    #[error("Failed to serialize message: {message}")]
    SerializationFailed {
        message: String,
    },
}

/// Top-level error type for the repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RepositoryError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error may go away on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. } | ExecutionError::QueueFull { .. }
            ),
            Self::Transport(e) => matches!(
                e,
                TransportError::ConnectionFailed { .. } | TransportError::NotConnected
            ),
            Self::Internal { .. } => false,
        }
    }
}

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage(err))
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
