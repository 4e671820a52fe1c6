//! Engine-level error type.

use fluenta_billing_core::{UserId, VoucherError};
use fluenta_billing_store::StoreError;

/// Errors surfaced by ledger and voucher operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// No subscription record exists for the user.
    #[error("subscription not found for user {0}")]
    SubscriptionNotFound(UserId),

    /// The deduction exceeds the remaining balance.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Credits remaining.
        available: i64,
        /// Credits the deduction needed.
        required: i64,
    },

    /// The free-tier daily text-message cap is reached.
    #[error("daily text message limit reached: {used}/{limit}")]
    DailyLimitExceeded {
        /// Messages already sent today.
        used: u32,
        /// The daily cap.
        limit: u32,
    },

    /// A voucher rule rejected the operation.
    #[error(transparent)]
    Voucher(#[from] VoucherError),

    /// The storage layer failed.
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        // Conditional-mutation outcomes become typed business errors; the
        // rest stays infrastructure.
        match err {
            StoreError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            StoreError::DailyCapReached { used, limit } => {
                Self::DailyLimitExceeded { used, limit }
            }
            StoreError::VoucherExhausted { .. } => Self::Voucher(VoucherError::MaxUsesReached),
            StoreError::RedemptionRevoked { .. } => Self::Voucher(VoucherError::AlreadyRevoked),
            other => Self::Store(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, BillingError>;
