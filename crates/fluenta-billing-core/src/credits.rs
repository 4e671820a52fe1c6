//! Credit transactions: the append-only ledger log.
//!
//! Every balance change writes exactly one transaction. Records are never
//! mutated or deleted; corrections are new compensating transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TransactionId, UserId};

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction id (ULID, time-ordered).
    pub id: TransactionId,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// Type of balance change.
    pub tx_type: TransactionType,

    /// Credits moved. Negative for charges, positive for grants.
    pub amount: i64,

    /// Credits remaining after this transaction.
    pub balance_after: i64,

    /// What this transaction refers to (session id, redemption id, ...).
    pub reference_id: String,

    /// Which collaborator caused it ("chat", "voice", "voucher", ...).
    pub source: String,

    /// Human-readable description.
    pub description: String,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// A usage charge. The amount is stored negative regardless of sign in.
    #[must_use]
    pub fn charge(
        user_id: UserId,
        amount: i64,
        reference_id: impl Into<String>,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            tx_type: TransactionType::Charge,
            amount: -amount.abs(),
            balance_after: 0,
            reference_id: reference_id.into(),
            source: source.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// A promotional or voucher grant.
    #[must_use]
    pub fn bonus(
        user_id: UserId,
        amount: i64,
        reference_id: impl Into<String>,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            tx_type: TransactionType::Bonus,
            amount: amount.abs(),
            balance_after: 0,
            reference_id: reference_id.into(),
            source: source.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// A compensating refund for an earlier charge.
    #[must_use]
    pub fn refund(
        user_id: UserId,
        amount: i64,
        reference_id: impl Into<String>,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            tx_type: TransactionType::Refund,
            amount: amount.abs(),
            balance_after: 0,
            reference_id: reference_id.into(),
            source: source.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits deducted for usage (including zero-amount audit entries for
    /// unlimited-tier usage).
    Charge,

    /// Promotional or voucher credits granted.
    Bonus,

    /// A compensating correction for an earlier charge.
    Refund,
}

impl TransactionType {
    /// Whether this type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Bonus | Self::Refund)
    }
}
