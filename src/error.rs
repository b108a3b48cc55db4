//! Error types for the agent task orchestrator

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // =============================
    // Task Store Errors
    // =============================

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task {task_id} did not finish within {secs}s")]
    SyncTimeout { task_id: Uuid, secs: u64 },

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Outcome of a failed backend invocation, returned as a value by the
/// invocation layer once every avenue has been tried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("all backends exhausted after {hops} fallback hop(s): {last}")]
    Exhausted { hops: usize, last: String },

    #[error("backend {backend} timed out")]
    Timeout { backend: String },

    #[error("backend {backend} returned HTTP {status}: {body}")]
    Http {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("backend {backend} unreachable: {message}")]
    Unreachable { backend: String, message: String },

    #[error("backend {backend} sent an unreadable reply: {message}")]
    Malformed { backend: String, message: String },
}

/// Raw transport failure, classified before the fallback policy looks at it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid response body: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_decode() {
            TransportError::Body(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                code: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}
