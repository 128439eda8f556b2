//! Mapping from domain errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tutoring::{
    accounts::AccountError, classroom::ClassroomError, dispute::DisputeError,
    payment::PaymentError, payout::PayoutError, providers::ProviderError, wallet::WalletError,
};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(error: &dyn std::fmt::Display, message: String) -> Self {
        tracing::error!(error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn provider(error: &ProviderError) -> Self {
        crate::logging::log_provider_failure("request", None, &error.to_string());
        Self::new(StatusCode::BAD_GATEWAY, error.client_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        let status = match &e {
            AccountError::Database(_)
            | AccountError::HashingFailed
            | AccountError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            AccountError::InvalidCredentials | AccountError::JwtError(_) => {
                StatusCode::UNAUTHORIZED
            }
            AccountError::NotFound(_) => StatusCode::NOT_FOUND,
            AccountError::EmailTaken => StatusCode::CONFLICT,
            AccountError::Validation(_) | AccountError::WeakPassword(_) => {
                StatusCode::BAD_REQUEST
            }
            AccountError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        };
        Self::new(status, e.client_message())
    }
}

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        let status = match &e {
            WalletError::Database(_) | WalletError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            WalletError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            WalletError::WalletNotFound(_) | WalletError::TransactionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            WalletError::DuplicateReference(_) => StatusCode::CONFLICT,
            WalletError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.client_message())
    }
}

impl From<ClassroomError> for ApiError {
    fn from(e: ClassroomError) -> Self {
        let status = match e {
            ClassroomError::Wallet(e) => return e.into(),
            ClassroomError::Account(e) => return e.into(),
            ClassroomError::Database(_) | ClassroomError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            ClassroomError::NotFound(_)
            | ClassroomError::TutorNotFound(_)
            | ClassroomError::StudentNotFound(_)
            | ClassroomError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
            ClassroomError::Validation(_) => StatusCode::BAD_REQUEST,
            ClassroomError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ClassroomError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            ClassroomError::InvalidTransition { .. }
            | ClassroomError::CancellationWindowElapsed
            | ClassroomError::AlreadyStarted => StatusCode::CONFLICT,
        };
        Self::new(status, e.client_message())
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        let status = match e {
            PaymentError::Wallet(e) => return e.into(),
            PaymentError::Account(e) => return e.into(),
            PaymentError::Provider(ref provider) => return Self::provider(provider),
            PaymentError::Database(_) | PaymentError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            PaymentError::PlanNotFound(_) | PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InvalidReference(_) | PaymentError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self::new(status, e.client_message())
    }
}

impl From<PayoutError> for ApiError {
    fn from(e: PayoutError) -> Self {
        let status = match e {
            PayoutError::Wallet(e) => return e.into(),
            PayoutError::Account(e) => return e.into(),
            PayoutError::Provider(ref provider) => return Self::provider(provider),
            PayoutError::Database(_) | PayoutError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            PayoutError::NotFound(_) => StatusCode::NOT_FOUND,
            PayoutError::Validation(_) | PayoutError::BelowMinimum { .. } => {
                StatusCode::BAD_REQUEST
            }
            PayoutError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PayoutError::NoConnectAccount
            | PayoutError::NotClaimed(_)
            | PayoutError::SettlementInProgress => StatusCode::CONFLICT,
            PayoutError::Rejected(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.client_message())
    }
}

impl From<DisputeError> for ApiError {
    fn from(e: DisputeError) -> Self {
        let status = match e {
            DisputeError::Account(e) => return e.into(),
            DisputeError::Database(_) | DisputeError::InvalidRecord(_) => {
                return Self::internal(&e, e.client_message());
            }
            DisputeError::NotFound(_) => StatusCode::NOT_FOUND,
            DisputeError::Validation(_) => StatusCode::BAD_REQUEST,
            DisputeError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DisputeError::AlreadyResolved(_) => StatusCode::CONFLICT,
        };
        Self::new(status, e.client_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;
    use tutoring::classroom::ClassroomStatus;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (AccountError::EmailTaken.into(), StatusCode::CONFLICT),
            (AccountError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (
                ClassroomError::InsufficientFunds {
                    available: dec!(5),
                    required: dec!(10),
                }
                .into(),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ClassroomError::InvalidTransition {
                    from: ClassroomStatus::Accepted,
                    to: ClassroomStatus::Accepted,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                ClassroomError::Wallet(WalletError::WalletNotFound(1)).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                PaymentError::InvalidReference("tr_1".to_string()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                PaymentError::Provider(ProviderError::Decode("bad".to_string())).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (PayoutError::SettlementInProgress.into(), StatusCode::CONFLICT),
            (DisputeError::AlreadyResolved(3).into(), StatusCode::CONFLICT),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status, expected, "{}", error.message);
        }
    }

    #[test]
    fn test_database_errors_hide_details() {
        let error: ApiError = WalletError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "Internal server error");
    }
}
