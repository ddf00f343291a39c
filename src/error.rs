//! Error types for tasksync
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (validation, bad args, unknown task)
//! - 3: Authentication required (missing owner, expired session)
//! - 4: Operation failed (network, timeout, storage)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Exit codes for the tasksync CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const AUTH_REQUIRED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// The four mutation entry points exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    ToggleComplete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::ToggleComplete => "toggle_complete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for tasksync operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("A change to task {0} is still in flight")]
    Busy(String),

    // Authentication (exit code 3)
    #[error("Authentication required: {0}")]
    Auth(String),

    // Operation failures (exit code 4)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Session ended before the change was confirmed")]
    SessionEnded,

    #[error("{op} failed for task {id}: {source}")]
    Mutation {
        op: MutationKind,
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn mutation(op: MutationKind, id: impl Into<String>, source: Error) -> Self {
        Error::Mutation {
            op,
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// The underlying cause, looking through mutation context.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Mutation { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::Validation { .. }
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::NotFound(_)
            | Error::Busy(_) => exit_codes::USER_ERROR,

            Error::Auth(_) => exit_codes::AUTH_REQUIRED,

            Error::Mutation { source, .. } => source.exit_code(),

            // Operation failures
            Error::Network(_)
            | Error::Timeout(_)
            | Error::Payload(_)
            | Error::SessionEnded
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Watch(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.cause(),
            Error::Network(_) | Error::Timeout(_) | Error::LockFailed(_) | Error::Io(_)
        )
    }

    /// Whether the user has to sign in again before retrying.
    pub fn requires_reauth(&self) -> bool {
        matches!(self.cause(), Error::Auth(_))
    }

    /// Structured details for JSON output.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Validation { field, reason } => Some(serde_json::json!({
                "field": field,
                "reason": reason,
            })),
            Error::Mutation { op, id, source } => Some(serde_json::json!({
                "operation": op,
                "id": id,
                "retryable": source.is_retryable(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for tasksync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_reports_cause_exit_code() {
        let err = Error::mutation(
            MutationKind::Delete,
            "01hx",
            Error::Network("connection reset".to_string()),
        );
        assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
        assert!(err.is_retryable());
        assert!(!err.requires_reauth());
        assert_eq!(
            err.to_string(),
            "delete failed for task 01hx: Network error: connection reset"
        );
    }

    #[test]
    fn auth_is_not_retryable() {
        let err = Error::mutation(
            MutationKind::Update,
            "01hx",
            Error::Auth("session expired".to_string()),
        );
        assert!(err.requires_reauth());
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), exit_codes::AUTH_REQUIRED);
    }
}
