//! Structured error types for the arcade core
//!
//! One taxonomy shared by the store, the ledger, the session store and the
//! services layered on top of them. Store failures are never swallowed here;
//! callers decide whether to abort or retry a round.

use std::time::Duration;
use thiserror::Error;

use crate::ledger::AccountId;

/// Primary error type for arcade operations
#[derive(Error, Debug)]
pub enum ArcadeError {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Strict fetch of an absent entity
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed scope, reason or state payload
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Unexpected concurrent transition (e.g. ending a session twice)
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Spend attempted with a balance below the price
    #[error("insufficient beans on account {account}: balance {balance}, required {required}")]
    InsufficientBeans {
        account: AccountId,
        balance: i64,
        required: i64,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Error raised by SQLite
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Writer waited past the busy timeout for the database lock
    #[error("store busy: gave up after {timeout:?}")]
    StoreBusy { timeout: Duration },

    /// Store used before `connect` or after `close`
    #[error("store is not connected")]
    StoreClosed,

    /// Blocking store task panicked or was cancelled
    #[error("store task failed: {message}")]
    TaskFailed { message: String },

    // =========================================================================
    // Configuration / IO
    // =========================================================================
    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArcadeError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Check if error is transient (lock contention on the store)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreBusy { .. } => true,
            Self::Store(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientBeans {
                balance, required, ..
            } => format!(
                "You need {} beans but only have {}.",
                required, balance
            ),
            Self::NotFound { entity, .. } => format!("That {} does not exist.", entity),
            Self::StoreBusy { .. } | Self::Store(_) | Self::TaskFailed { .. } => {
                "The game database is busy. Please try again in a moment.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Map a raw SQLite error, turning busy/locked failures into `StoreBusy`
    pub(crate) fn from_store(err: rusqlite::Error, busy_timeout: Duration) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::StoreBusy {
                    timeout: busy_timeout,
                }
            }
            _ => Self::Store(err),
        }
    }
}

impl From<serde_json::Error> for ArcadeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ArcadeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias using ArcadeError
pub type Result<T> = std::result::Result<T, ArcadeError>;
