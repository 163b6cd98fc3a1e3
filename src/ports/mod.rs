//! Async traits at every collaborator seam, and the errors crossing them.
//! Services depend only on these; adapters implement them.

pub mod files;
pub mod ledger;
pub mod loans;
pub mod notification;
pub mod products;
pub mod users;

pub use files::{FileStorage, StorageError};
pub use ledger::InvestmentLedger;
pub use loans::{InvestmentTransaction, LoanFilter, LoanRepository};
pub use notification::{EmailAttachment, EmailMessage, EmailSender, Mailbox, NotificationError};
pub use products::ProductRepository;
pub use users::UserRepository;

use thiserror::Error;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The store aborted the transaction to keep it serializable; safe to retry.
    #[error("transaction aborted by concurrent update: {0}")]
    SerializationFailure(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::SerializationFailure(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return RepositoryError::SerializationFailure(db_err.message().to_string())
                }
                Some(UNIQUE_VIOLATION) => {
                    return RepositoryError::Conflict(db_err.message().to_string())
                }
                _ => {}
            }
        }

        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            other => RepositoryError::Database(other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = RepositoryError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_serialization_failures_are_retryable() {
        assert!(RepositoryError::SerializationFailure("40001".to_string()).is_retryable());
        assert!(!RepositoryError::Conflict("dup".to_string()).is_retryable());
        assert!(!RepositoryError::TransactionClosed.is_retryable());
        assert!(!RepositoryError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
