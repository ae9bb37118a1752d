//! Storage failure categories.
//!
//! Every query in this crate returns [`StorageError`] instead of a raw
//! `sqlx::Error` so callers can map failures onto user-facing result codes
//! without inspecting driver internals.

use thiserror::Error;

/// Classified storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be reached or the pool could not hand out a
    /// connection.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated (e.g. duplicate VIN).
    #[error("uniqueness violation on {constraint}: {message}")]
    Conflict { constraint: String, message: String },

    /// A referential-integrity constraint was violated.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Any other failure during a statement or transaction.
    #[error("transaction failed: {0}")]
    Txn(String),
}

impl StorageError {
    /// Classify a `sqlx::Error` into one of the storage categories.
    ///
    /// PostgreSQL SQLSTATE 23505 is a unique violation, 23503 a foreign-key
    /// violation; the remaining 23xxx class counts as integrity too.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default().to_string();
                match code.as_str() {
                    "23505" => Self::Conflict {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                        message: db_err.message().to_string(),
                    },
                    "23503" => Self::Integrity(db_err.message().to_string()),
                    c if c.starts_with("23") => Self::Integrity(db_err.message().to_string()),
                    _ => Self::Txn(db_err.message().to_string()),
                }
            }
            _ => Self::Txn(err.to_string()),
        }
    }

    /// True when the conflict involves the named constraint column.
    pub fn conflicts_on(&self, column: &str) -> bool {
        matches!(self, Self::Conflict { constraint, .. } if constraint.contains(column))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::classify(err)
    }
}

/// Shorthand for query results in this crate.
pub type DbResult<T> = Result<T, StorageError>;
