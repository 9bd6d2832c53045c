use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a failure raised by a backend during invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// The backend did not answer within its configured time budget.
    Timeout,
    /// The backend could not be reached (network error, retries exhausted, spawn failure).
    Unreachable,
    /// The backend answered, but the answer could not be turned into text.
    InvalidResponse,
    /// The backend ran and reported a failure of its own.
    BackendFault,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::Unreachable => write!(f, "unreachable"),
            BackendErrorKind::InvalidResponse => write!(f, "invalid_response"),
            BackendErrorKind::BackendFault => write!(f, "backend_fault"),
        }
    }
}

/// A classified backend failure.
///
/// This is what a task record keeps when it ends up `Failed`, so it is cheap
/// to clone and serializes as `{"kind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Failure class.
    pub kind: BackendErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl BackendError {
    /// Creates an error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a [`BackendErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    /// Creates a [`BackendErrorKind::Unreachable`] error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unreachable, message)
    }

    /// Creates a [`BackendErrorKind::InvalidResponse`] error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidResponse, message)
    }

    /// Creates a [`BackendErrorKind::BackendFault`] error.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::BackendFault, message)
    }
}

/// A convenience `Result` alias for adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Top-level error type for adapta.
#[derive(Debug, thiserror::Error)]
pub enum AdaptaError {
    /// Bad or missing constructor argument, or an unrecognized adapter kind.
    /// Raised at construction time and never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A classified backend failure.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// No task with this identifier exists in the store.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A task with this identifier is already stored.
    #[error("Task already exists: {0}")]
    DuplicateTask(Uuid),

    /// A task state change that would break the lifecycle ordering.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// The task being updated.
        task_id: Uuid,
        /// State the record was in.
        from: String,
        /// State that was requested.
        to: String,
    },

    /// Streaming was requested from an adapter that cannot stream.
    #[error("Adapter '{0}' does not support streaming")]
    StreamingUnsupported(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`AdaptaError`].
pub type AdaptaResult<T> = Result<T, AdaptaError>;
