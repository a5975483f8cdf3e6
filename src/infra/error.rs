//! Error types for the receipt store infrastructure

use thiserror::Error;

/// Errors that can occur in a receipt store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// Embedded engine error
    #[error("embedded store error: {0}")]
    Embedded(#[from] sled::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A receipt with this id is already stored
    #[error("duplicate receipt id: {0}")]
    DuplicateKey(String),

    /// A lookup entry exists but its primary record is missing or unreadable
    #[error("corrupt receipt {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// The store has been closed
    #[error("receipt store is closed")]
    Closed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn corrupt(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a write that failed with this error may succeed if retried
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StoreError::Closed | StoreError::Configuration(_) | StoreError::Serialization(_)
        )
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Internal(format!("store task failed: {err}"))
    }
}

/// Errors reported by a delivery sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Nobody is listening; the receipt is stored but not pushed
    #[error("no active subscribers")]
    NoSubscribers,

    /// The sink has been shut down
    #[error("delivery sink closed")]
    Closed,
}

/// Result type for receipt store operations
pub type Result<T> = std::result::Result<T, StoreError>;
