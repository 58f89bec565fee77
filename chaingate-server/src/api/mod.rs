//! HTTP handlers.
//!
//! - `public`: merchant API, authenticated with `X-API-KEY`
//! - `internal`: state reports from the blockchain services
//! - `ws`: the checkout page's websocket

pub mod extractors;
pub mod internal;
pub mod public;
pub mod ws;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chaingate_core::processors::{BlockchainError, PaymentError};
use chaingate_core::vault::VaultError;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors returned by the API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized | ApiError::Vault(VaultError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Payment(PaymentError::Validation(reason)) => {
                (StatusCode::BAD_REQUEST, reason.clone())
            }
            ApiError::Payment(PaymentError::Upstream(BlockchainError::AmountTooLow(_))) => (
                StatusCode::BAD_REQUEST,
                "amount is too low for the selected currency".to_string(),
            ),
            ApiError::Payment(PaymentError::NotFound) => {
                (StatusCode::NOT_FOUND, "payment not found".to_string())
            }
            ApiError::Payment(PaymentError::Upstream(e)) => {
                tracing::warn!(error = %e, "Blockchain service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "blockchain service unavailable".to_string(),
                )
            }
            ApiError::Payment(e) => {
                tracing::error!(error = %e, "Payment engine error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Vault(e) => {
                tracing::error!(error = %e, "API key vault error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_message();
        (status, Json(ErrorBody { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaingate_sdk::objects::CryptoCurrency;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::Vault(VaultError::Unauthorized),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::Payment(PaymentError::Validation("bad".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Payment(PaymentError::Upstream(BlockchainError::AmountTooLow(
                    CryptoCurrency::Btc,
                ))),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Payment(PaymentError::Upstream(BlockchainError::Rejected {
                    status: 503,
                    body: String::new(),
                })),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Payment(PaymentError::NotFound),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
