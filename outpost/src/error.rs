//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update that must affect exactly one row affected none.
    ///
    /// Raised by `mark_completed`, `mark_failed` and `replay` when the job
    /// vanished or was already transitioned by someone else.
    #[error("Store integrity error: {operation} on job {job_id} expected a {expected} row")]
    StoreIntegrity {
        operation: &'static str,
        job_id: i64,
        expected: String,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn integrity(operation: &'static str, job_id: i64, expected: impl Into<String>) -> Self {
        Self::StoreIntegrity {
            operation,
            job_id,
            expected: expected.into(),
        }
    }

    /// Whether this error signals a lost or conflicting row transition.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::StoreIntegrity { .. })
    }
}
