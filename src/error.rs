use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::TransitionError;
use crate::ports::{NotificationError, RepositoryError, StorageError};
use crate::utils::money::MoneyError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Borrower already has an open loan")]
    LoanAlreadyExists,

    #[error("Borrower has already been visited for this loan")]
    LoanAlreadyVisited,

    #[error("Loan is not open for investment")]
    LoanNotInvestable,

    #[error("Loan is not ready to be disbursed")]
    LoanNotDisbursable,

    #[error("Investment of {amount} exceeds the remaining {remaining}")]
    InvestmentAmountExceedsPrincipal { amount: String, remaining: String },

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Loan not found: {0}")]
    LoanNotFound(i64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        AppError::InvalidParams(err.to_string())
    }
}

impl AppError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidParams(_) => "InvalidParams",
            AppError::Transition(TransitionError::InvalidNextState { .. }) => "InvalidNextState",
            AppError::Transition(TransitionError::IllegalTransition { .. }) => "IllegalTransition",
            AppError::Transition(TransitionError::UnknownState(_)) => "UnknownState",
            AppError::LoanAlreadyExists => "LoanAlreadyExists",
            AppError::LoanAlreadyVisited => "LoanAlreadyVisited",
            AppError::LoanNotInvestable => "LoanNotInvestable",
            AppError::LoanNotDisbursable => "LoanNotDisbursable",
            AppError::InvestmentAmountExceedsPrincipal { .. } => {
                "InvestmentAmountExceedsPrincipal"
            }
            AppError::UserNotFound(_) => "UserNotFound",
            AppError::LoanNotFound(_) => "LoanNotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::DeadlineExceeded => "DeadlineExceeded",
            AppError::Storage(_) => "StorageFailure",
            AppError::Notification(_) => "NotificationFailure",
            AppError::Repository(_) | AppError::Internal(_) => "ServerError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            AppError::Transition(_)
            | AppError::LoanAlreadyExists
            | AppError::LoanAlreadyVisited
            | AppError::LoanNotInvestable
            | AppError::LoanNotDisbursable
            | AppError::InvestmentAmountExceedsPrincipal { .. } => StatusCode::CONFLICT,
            AppError::UserNotFound(_) | AppError::LoanNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            AppError::Storage(_) | AppError::Notification(_) => StatusCode::BAD_GATEWAY,
            AppError::Repository(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal detail never leaves the process.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Repository(_) | AppError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            AppError::Storage(_) => "File storage is unavailable".to_string(),
            AppError::Notification(_) => "Notification delivery failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Serialization conflicts from a serializable transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Repository(err) if err.is_retryable())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LoanStatus;

    #[test]
    fn test_transition_errors_keep_their_codes() {
        let err = AppError::from(TransitionError::IllegalTransition {
            from: LoanStatus::Proposed,
            to: LoanStatus::Approved,
            action: "ApproveLoan",
            reason: "borrower has not been visited",
        });
        assert_eq!(err.code(), "IllegalTransition");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = AppError::from(TransitionError::UnknownState("rejected".to_string()));
        assert_eq!(err.code(), "UnknownState");
    }

    #[test]
    fn test_overinvestment_status_code() {
        let err = AppError::InvestmentAmountExceedsPrincipal {
            amount: "2000001".to_string(),
            remaining: "2000000".to_string(),
        };
        assert_eq!(err.code(), "InvestmentAmountExceedsPrincipal");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = AppError::Repository(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.code(), "ServerError");
        assert_eq!(err.public_message(), "An internal error occurred");
        assert!(!err.public_message().contains("pool"));

        let err = AppError::Internal("template missing at /srv/letter.pdf".to_string());
        assert!(!err.public_message().contains("/srv"));
    }

    #[test]
    fn test_only_serialization_failures_are_retryable() {
        assert!(AppError::from(RepositoryError::SerializationFailure("40001".to_string()))
            .is_retryable());
        assert!(!AppError::from(RepositoryError::Conflict("dup".to_string())).is_retryable());
        assert!(!AppError::LoanNotInvestable.is_retryable());
    }

    #[test]
    fn test_money_errors_are_invalid_params() {
        let err = AppError::from(MoneyError::Parse("abc".to_string()));
        assert_eq!(err.code(), "InvalidParams");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_response_status() {
        let response = AppError::LoanNotFound(9).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
