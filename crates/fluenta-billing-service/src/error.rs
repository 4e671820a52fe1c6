//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use fluenta_billing_core::VoucherError;
use fluenta_billing_engine::BillingError;
use fluenta_billing_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Insufficient credits.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        available: i64,
        /// Required amount.
        required: i64,
    },

    /// The free-tier daily text cap is spent.
    #[error("daily limit reached: {used}/{limit}")]
    DailyLimitReached {
        /// Messages already sent today.
        used: u32,
        /// The daily cap.
        limit: u32,
    },

    /// A voucher rule rejected the request.
    #[error("voucher rejected: {0}")]
    VoucherRejected(VoucherError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::InsufficientCredits {
                available,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::DailyLimitReached { used, limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                "daily_limit_reached",
                self.to_string(),
                Some(serde_json::json!({
                    "used": used,
                    "limit": limit
                })),
            ),
            Self::VoucherRejected(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "voucher_invalid",
                err.to_string(),
                Some(serde_json::json!({ "reason": err.code() })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SubscriptionNotFound(user_id) => {
                Self::NotFound(format!("subscription not found: {user_id}"))
            }
            BillingError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            BillingError::DailyLimitExceeded { used, limit } => {
                Self::DailyLimitReached { used, limit }
            }
            BillingError::Voucher(inner) => Self::VoucherRejected(inner),
            BillingError::Store(inner) => inner.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            StoreError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            StoreError::DailyCapReached { used, limit } => {
                Self::DailyLimitReached { used, limit }
            }
            StoreError::VoucherExhausted { .. } => {
                Self::VoucherRejected(VoucherError::MaxUsesReached)
            }
            StoreError::RedemptionRevoked { .. } => {
                Self::VoucherRejected(VoucherError::AlreadyRevoked)
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
