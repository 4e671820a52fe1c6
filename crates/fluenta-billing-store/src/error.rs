//! Error types for billing storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// The conditional-mutation variants (`InsufficientCredits`,
/// `DailyCapReached`, `VoucherExhausted`, `RedemptionRevoked`) are business
/// outcomes the engine maps to typed results; `Database` and
/// `Serialization` are infrastructure failures and stay fatal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("subscription", "voucher", ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Conditional deduction refused: balance too low.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Credits remaining.
        available: i64,
        /// Credits the deduction needed.
        required: i64,
    },

    /// Conditional increment refused: the daily text allowance is spent.
    #[error("daily text cap reached: {used}/{limit}")]
    DailyCapReached {
        /// Messages already counted today.
        used: u32,
        /// The daily cap.
        limit: u32,
    },

    /// Conditional increment refused: the voucher's global cap is spent.
    #[error("voucher exhausted: {code}")]
    VoucherExhausted {
        /// The exhausted voucher code.
        code: String,
    },

    /// The redemption was already revoked; the counter is not decremented
    /// a second time.
    #[error("redemption already revoked: {id}")]
    RedemptionRevoked {
        /// The redemption id.
        id: String,
    },
}
