//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed payload, bad data key, unbalanced transaction
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Search query failed to parse or validate
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    /// Search namespace is not `accounts` or `transactions`
    #[error("Invalid search namespace: {0}")]
    InvalidNamespace(String),

    /// Entity already exists with different content
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Update against an entity that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The atomic commit unit was rolled back
    #[error("Commit failed for transaction {id}: {reason}")]
    CommitFailed {
        /// Transaction ID
        id: String,
        /// Underlying failure
        reason: String,
    },

    /// Storage error (SQLite via sqlx)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error kind tag seen by the service boundary.
///
/// The boundary never inspects the raw storage error, only this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client sent something malformed
    InvalidInput,
    /// Search DSL rejected
    InvalidQuery,
    /// Unknown search namespace
    InvalidNamespace,
    /// ID collision
    Conflict,
    /// Missing entity
    NotFound,
    /// Storage, serialization or commit failure
    Internal,
}

impl ErrorKind {
    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidQuery => "search.query.invalid",
            ErrorKind::InvalidNamespace => "search.namespace.invalid",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Error::InvalidNamespace(_) => ErrorKind::InvalidNamespace,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::CommitFailed { .. }
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn commit_failed(id: &str, reason: impl ToString) -> Self {
        Error::CommitFailed {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Whether a storage error is a uniqueness (or primary key) violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            // SQLITE_CONSTRAINT_PRIMARYKEY = 1555, SQLITE_CONSTRAINT_UNIQUE = 2067
            db_err.is_unique_violation()
                || matches!(db_err.code().as_deref(), Some("1555") | Some("2067"))
        }
        _ => false,
    }
}
