//! Storage layer for Fluenta billing.
//!
//! This crate abstracts persistence behind the [`Store`] trait. The
//! concurrently-contended values (a subscription's `credits_remaining` and
//! `daily_text_count`, a voucher's `current_uses`) are only ever mutated
//! through the trait's compound operations, each of which performs its
//! check and its write as one atomic unit inside the store. Callers never
//! read-then-write those counters themselves; that split is exactly the
//! race this layer exists to prevent.
//!
//! Backends:
//!
//! - [`MemoryStore`] — always available; one mutex held across every
//!   compound operation. Used by tests and the default service build.
//! - `RocksStore` — persistent backend behind the `rocksdb-backend`
//!   feature (RocksDB requires libclang at build time).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::NaiveDate;

use fluenta_billing_core::{
    CreditTransaction, RedemptionId, Subscription, TransactionId, UserId, Voucher,
    VoucherId, VoucherRedemption,
};

/// The side effect applied atomically with a voucher redemption.
#[derive(Debug, Clone)]
pub enum RedemptionEffect {
    /// No ledger effect (monetary discounts, tier upgrades).
    None,

    /// Grant the transaction's amount to the user's balance and allotment.
    GrantCredits {
        /// The bonus transaction to append; its `amount` is the grant.
        transaction: CreditTransaction,
    },

    /// Push the user's trial end date out by this many days.
    ExtendTrial {
        /// Days to add.
        days: i64,
    },
}

/// The storage trait defining all database operations.
///
/// Object-safe so services can hold an `Arc<dyn Store>` and tests can swap
/// backends freely.
pub trait Store: Send + Sync {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Insert or update a subscription record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// List a user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Compound Ledger Operations
    // =========================================================================

    /// Deduct the transaction's (negative) amount from the user's balance and
    /// append the transaction, atomically. The stored transaction's
    /// `balance_after` is set by the store.
    ///
    /// Without `force` the deduction is conditional: it fails rather than
    /// overdraw. With `force` the balance is clamped at zero and the full
    /// amount is still recorded, so forced deductions stay auditable.
    ///
    /// Returns the balance after the deduction.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the subscription doesn't exist.
    /// - `StoreError::InsufficientCredits` if `force` is false and the
    ///   balance is too low.
    fn charge_credits(&self, transaction: &CreditTransaction, force: bool) -> Result<i64>;

    /// Add the transaction's (positive) amount to the user's balance and
    /// period allotment and append the transaction, atomically.
    ///
    /// Returns the balance after the grant.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscription doesn't exist.
    fn add_credits(&self, transaction: &CreditTransaction) -> Result<i64>;

    /// Add `count` to the user's daily text-message counter for `today`,
    /// resetting it first when the stored date is older. When `limit` is
    /// given the increment is conditional: it fails without mutating when
    /// the new count would pass the limit, so concurrent bumps cannot
    /// overrun a cap. Returns the count after the increment.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the subscription doesn't exist.
    /// - `StoreError::DailyCapReached` if the increment would pass `limit`.
    fn bump_daily_text_count(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        count: u32,
        limit: Option<u32>,
    ) -> Result<u32>;

    // =========================================================================
    // Voucher Operations
    // =========================================================================

    /// Insert or update a voucher (admin collaborator seam).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_voucher(&self, voucher: &Voucher) -> Result<()>;

    /// Get a voucher by normalized code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_voucher(&self, code: &str) -> Result<Option<Voucher>>;

    /// Get a voucher by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_voucher_by_id(&self, id: &VoucherId) -> Result<Option<Voucher>>;

    // =========================================================================
    // Redemption Operations
    // =========================================================================

    /// Get a redemption by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_redemption(&self, id: &RedemptionId) -> Result<Option<VoucherRedemption>>;

    /// List a user's redemptions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_redemptions_by_user(&self, user_id: &UserId) -> Result<Vec<VoucherRedemption>>;

    // =========================================================================
    // Compound Voucher Operations
    // =========================================================================

    /// Record a redemption, increment the voucher's `current_uses`
    /// (conditionally on its cap), and apply the side effect — as one atomic
    /// unit. Either everything lands or nothing does; a redemption without
    /// its credit grant cannot exist.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the voucher (or, for effects, the
    ///   subscription) doesn't exist.
    /// - `StoreError::VoucherExhausted` if the cap was spent by a
    ///   concurrent redemption.
    fn redeem_voucher(
        &self,
        redemption: &VoucherRedemption,
        effect: &RedemptionEffect,
    ) -> Result<()>;

    /// Flip a redemption to `Revoked` and decrement the voucher's
    /// `current_uses`, atomically. Side effects already granted are not
    /// reversed. Returns the updated redemption.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the redemption doesn't exist.
    /// - `StoreError::RedemptionRevoked` if it was already revoked.
    fn revoke_redemption(&self, id: &RedemptionId) -> Result<VoucherRedemption>;
}
