//! Error types for the asset daemon.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::StatusCode;

use crate::tasks::{ClientId, TaskId};

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client for {pool}: {reason}")]
    HttpClient { pool: String, reason: String },
}

/// Errors raised while a job works on its task.
///
/// Every variant ends up as a terminal `Fail` on the owning task. The
/// `Display` text is the verbose diagnostic kept in `message_detailed`;
/// [`TaskError::user_message`] is the short text shown to the user.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("{operation} failed - {status}: {url}")]
    Status {
        operation: String,
        status: StatusCode,
        url: String,
    },

    #[error("Malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Packing exited with {}\nOutput: {output}", exit_code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Subprocess {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Packed file ({}) does not exist, please try manual packing first", path.display())]
    MissingOutput { path: PathBuf },

    #[error("Invalid task data: {0}")]
    InvalidInput(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Worker panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Build an IO error bound to the path it happened on.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Build a transport error for a failed request.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source: Arc::new(source),
        }
    }

    /// Short human-readable message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { source, .. } if source.is_timeout() => {
                "Request timed out".to_string()
            }
            Self::Transport { source, .. } if source.is_connect() => {
                "Could not connect to server".to_string()
            }
            Self::Transport { .. } => "Network request failed".to_string(),
            Self::Status {
                operation, status, ..
            } => format!("{operation} failed ({})", status.as_u16()),
            Self::Decode { .. } => "Server sent an unexpected response".to_string(),
            Self::Io { action, .. } => format!("Failed to {action} file"),
            Self::Subprocess { .. } => "Asset packing failed".to_string(),
            Self::MissingOutput { .. } => {
                "Packed file not found, please try manual packing first".to_string()
            }
            Self::InvalidInput(reason) => format!("Invalid request: {reason}"),
            Self::Cancelled(reason) => format!("Cancelled: {reason}"),
            Self::Panicked(_) => "Internal error".to_string(),
        }
    }

    /// Whether this error records a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Invariant violations raised while applying a mutation to the registry.
///
/// These are programmer errors: the bus logs and drops them.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Task {task_id} not found for client {client_id}")]
    UnknownTask { client_id: ClientId, task_id: TaskId },

    #[error("Task {task_id} already registered for client {client_id}")]
    DuplicateTask { client_id: ClientId, task_id: TaskId },
}
