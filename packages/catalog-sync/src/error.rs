use catalog_state::{ErrorKind as StorageErrorKind, StorageError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::models::ValidationError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("State store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search index transport error: {0}")]
    IndexTransport(#[from] reqwest::Error),

    #[error("Search index error (status {status:?}): {message}")]
    Index { status: Option<u16>, message: String },

    #[error("Search index does not exist: {0}")]
    IndexMissing(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Bulk upsert into '{index}' rejected {failed} of {total} documents (first: {first_error})")]
    PartialUpload {
        index: String,
        failed: usize,
        total: usize,
        first_error: String,
        transient: bool,
    },

    #[error("Bulk upsert into '{index}' was not confirmed: {reason}")]
    UnconfirmedUpload { index: String, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Stream '{stream}' has no checkpoint key '{key}'")]
    UnknownCheckpointKey { stream: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn index<E: std::fmt::Display>(status: Option<u16>, e: E) -> Self {
        Self::Index {
            status,
            message: e.to_string(),
        }
    }

    /// Source or index could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SyncError::IndexTransport(_) => true,
            // no HTTP status: no node answered
            SyncError::Index { status: None, .. } => true,
            SyncError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            SyncError::Storage(e) => e.is_connection(),
            _ => false,
        }
    }

    /// Classification used in logs and run reports. Nothing is retried inside
    /// a run; the category tells operators whether the next trigger will
    /// likely succeed on its own.
    pub fn category(&self) -> ErrorCategory {
        if self.is_connectivity() {
            return ErrorCategory::Transient;
        }
        match self {
            SyncError::Storage(e) if e.kind == StorageErrorKind::LeaseLost => {
                ErrorCategory::Transient
            }
            SyncError::Index {
                status: Some(status),
                ..
            } if *status == 429 || *status >= 500 => ErrorCategory::Transient,
            SyncError::PartialUpload { transient, .. } => {
                if *transient {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            // the next trigger re-sends the batch
            SyncError::UnconfirmedUpload { .. } => ErrorCategory::Transient,
            SyncError::IndexMissing(_) => ErrorCategory::Infrastructure,
            SyncError::Database(sqlx::Error::Tls(_)) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Error category for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient error - next trigger resumes from the same checkpoint (e.g., timeout, connection)
    Transient,
    /// Permanent error - needs a data or code fix (e.g., invalid record, rejected mapping)
    Permanent,
    /// Infrastructure error - needs provisioning (e.g., missing index, TLS setup)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
