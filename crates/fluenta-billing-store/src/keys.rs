//! Key encoding utilities for `RocksDB`.
//!
//! User-scoped index keys are `user_id (16 bytes) || record_id (16 bytes)`.
//! Transaction and redemption ids are ULIDs, so index entries for a user
//! sort by creation time.

use fluenta_billing_core::{RedemptionId, TransactionId, UserId, VoucherId};

/// Create a subscription key from a user id.
#[must_use]
pub fn subscription_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction id.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create a user-transaction index key.
#[must_use]
pub fn user_transaction_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions for a user.
#[must_use]
pub fn user_transactions_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the transaction id from a user-transaction index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_transaction_id_from_user_key(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TransactionId::from_bytes(bytes)
}

/// Create a voucher key from a voucher id.
#[must_use]
pub fn voucher_key(voucher_id: &VoucherId) -> Vec<u8> {
    voucher_id.as_bytes().to_vec()
}

/// Create a code-index key from a normalized voucher code.
#[must_use]
pub fn voucher_code_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Create a redemption key from a redemption id.
#[must_use]
pub fn redemption_key(redemption_id: &RedemptionId) -> Vec<u8> {
    redemption_id.to_bytes().to_vec()
}

/// Create a user-redemption index key.
#[must_use]
pub fn user_redemption_key(user_id: &UserId, redemption_id: &RedemptionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&redemption_id.to_bytes());
    key
}

/// Create a prefix for iterating all redemptions for a user.
#[must_use]
pub fn user_redemptions_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the redemption id from a user-redemption index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_redemption_id_from_user_key(key: &[u8]) -> RedemptionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    RedemptionId::from_bytes(bytes)
}
