//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Subscription records, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by user, keyed by `user_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Voucher records, keyed by `voucher_id`.
    pub const VOUCHERS: &str = "vouchers";

    /// Index: normalized code to `voucher_id`.
    pub const VOUCHER_CODES: &str = "voucher_codes";

    /// Redemption records, keyed by `redemption_id` (ULID).
    pub const REDEMPTIONS: &str = "redemptions";

    /// Index: redemptions by user, keyed by `user_id || redemption_id`.
    /// Value is empty (index only).
    pub const REDEMPTIONS_BY_USER: &str = "redemptions_by_user";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SUBSCRIPTIONS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::VOUCHERS,
        cf::VOUCHER_CODES,
        cf::REDEMPTIONS,
        cf::REDEMPTIONS_BY_USER,
    ]
}
