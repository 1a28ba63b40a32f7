//! Error types shared across the operator.
//!
//! Every error message carries the `namespace/name` key of the object it was
//! raised for, so that log lines and Kubernetes events can be correlated
//! without extra context.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Optimistic-concurrency conflict; the next pass observes the newer state.
    #[error("conflict while writing {key}: {reason}")]
    ConflictError { key: String, reason: String },

    /// The object as specified can never reconcile; waits for a user edit.
    #[error("validation failed for {key}: {reason}")]
    ValidationError { key: String, reason: String },

    /// The bi-directional binding between a group snapshot and its content is
    /// broken in a way the controller will not repair on its own.
    #[error("binding failed for {key}: {reason}")]
    BindingError { key: String, reason: String },

    /// A cascading delete could not be completed; retried with backoff.
    #[error("deletion cascade failed for {key}: {reason}")]
    CascadeError { key: String, reason: String },
}

impl Error {
    pub fn validation(key: impl ToString, reason: impl ToString) -> Self {
        Error::ValidationError {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn binding(key: impl ToString, reason: impl ToString) -> Self {
        Error::BindingError {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn cascade(key: impl ToString, reason: impl ToString) -> Self {
        Error::CascadeError {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn conflict(key: impl ToString, reason: impl ToString) -> Self {
        Error::ConflictError {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the worker loop should re-queue the key with backoff.
    ///
    /// Validation and binding errors are surfaced through `status.error` and
    /// an event instead; they only clear on a user edit, so retrying burns
    /// API calls without making progress.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::SerializationError(_)
            | Error::ConflictError { .. }
            | Error::CascadeError { .. } => true,
            Error::ValidationError { .. } | Error::BindingError { .. } => false,
        }
    }
}
