use thiserror::Error;

use super::models::ProjectId;

/// Errors surfaced by the timer engine to the user.
///
/// Remote failures never appear here: they are logged and the local
/// transition proceeds.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("pause the running timer first ({task_name} is still running)")]
    TimerAlreadyRunning { task_name: String },
    #[error("no timer running")]
    NoTimerRunning,
    #[error(
        "project {0} is already in your list; resume your existing task or submit it for approval"
    )]
    ProjectAlreadyClaimed(ProjectId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors writing local state.
///
/// Reads never fail: unreadable state is treated as absent.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write local state: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid request path {0}")]
    InvalidPath(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("remote returned status {0}")]
    Status(u16),
}

/// Every strategy of a fallback chain failed.
#[derive(Debug, Clone, Error)]
#[error("all {} remote attempts failed", attempts.len())]
pub struct FallbackError {
    pub attempts: Vec<AttemptFailure>,
}

/// One failed attempt of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub method: String,
    pub path: String,
    pub error: TransportError,
}
