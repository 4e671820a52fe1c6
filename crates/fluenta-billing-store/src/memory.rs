//! In-memory storage implementation.
//!
//! A single mutex guards all state, so every compound operation's
//! check-then-write runs under the lock and concurrent deductions or
//! redemptions serialize. Suitable for tests and single-process deployments
//! that accept losing state on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, NaiveDate, Utc};
use tracing::debug;

use fluenta_billing_core::{
    CreditTransaction, RedemptionId, RedemptionStatus, Subscription, TransactionId, UserId,
    Voucher, VoucherId, VoucherRedemption,
};

use crate::error::{Result, StoreError};
use crate::{RedemptionEffect, Store};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<UserId, Subscription>,
    // BTreeMaps keyed by ULID ids stay time-ordered for free.
    transactions: BTreeMap<TransactionId, CreditTransaction>,
    vouchers: HashMap<VoucherId, Voucher>,
    codes: HashMap<String, VoucherId>,
    redemptions: BTreeMap<RedemptionId, VoucherRedemption>,
}

/// In-memory `Store` implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("store mutex poisoned".to_string()))
    }
}

/// Subtract a charge from a subscription and append the transaction.
/// Shared by `charge_credits`; runs under the store lock.
fn apply_charge(
    inner: &mut Inner,
    transaction: &CreditTransaction,
    force: bool,
) -> Result<i64> {
    let amount = transaction.amount.abs();
    let subscription = inner
        .subscriptions
        .get_mut(&transaction.user_id)
        .ok_or_else(|| StoreError::NotFound {
            entity: "subscription",
            id: transaction.user_id.to_string(),
        })?;

    if !force && subscription.credits_remaining < amount {
        return Err(StoreError::InsufficientCredits {
            available: subscription.credits_remaining,
            required: amount,
        });
    }

    subscription.credits_remaining = (subscription.credits_remaining - amount).max(0);
    subscription.updated_at = Utc::now();
    let balance = subscription.credits_remaining;

    let mut stored = transaction.clone();
    stored.balance_after = balance;
    inner.transactions.insert(stored.id, stored);

    Ok(balance)
}

/// Add a grant to a subscription's balance and allotment and append the
/// transaction. Runs under the store lock.
fn apply_grant(inner: &mut Inner, transaction: &CreditTransaction) -> Result<i64> {
    let amount = transaction.amount.abs();
    let subscription = inner
        .subscriptions
        .get_mut(&transaction.user_id)
        .ok_or_else(|| StoreError::NotFound {
            entity: "subscription",
            id: transaction.user_id.to_string(),
        })?;

    subscription.credits_remaining += amount;
    subscription.credits_total += amount;
    subscription.updated_at = Utc::now();
    let balance = subscription.credits_remaining;

    let mut stored = transaction.clone();
    stored.balance_after = balance;
    inner.transactions.insert(stored.id, stored);

    Ok(balance)
}

impl Store for MemoryStore {
    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.lock()?
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(user_id).cloned())
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<CreditTransaction>> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.lock()?;
        Ok(inner
            .transactions
            .values()
            .rev() // newest first
            .filter(|tx| tx.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn charge_credits(&self, transaction: &CreditTransaction, force: bool) -> Result<i64> {
        let mut inner = self.lock()?;
        let balance = apply_charge(&mut inner, transaction, force)?;
        debug!(user_id = %transaction.user_id, amount = transaction.amount, balance, "charge applied");
        Ok(balance)
    }

    fn add_credits(&self, transaction: &CreditTransaction) -> Result<i64> {
        let mut inner = self.lock()?;
        let balance = apply_grant(&mut inner, transaction)?;
        debug!(user_id = %transaction.user_id, amount = transaction.amount, balance, "grant applied");
        Ok(balance)
    }

    fn bump_daily_text_count(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        count: u32,
        limit: Option<u32>,
    ) -> Result<u32> {
        let mut inner = self.lock()?;
        let subscription =
            inner
                .subscriptions
                .get_mut(user_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: user_id.to_string(),
                })?;

        let used = if subscription.daily_count_date == today {
            subscription.daily_text_count
        } else {
            0
        };
        // The cap check and the increment share the lock; a concurrent bump
        // cannot slip in between them.
        if let Some(limit) = limit {
            if used + count > limit {
                return Err(StoreError::DailyCapReached { used, limit });
            }
        }
        subscription.daily_count_date = today;
        subscription.daily_text_count = used + count;
        subscription.updated_at = Utc::now();
        debug!(user_id = %user_id, count = subscription.daily_text_count, "daily text count bumped");
        Ok(subscription.daily_text_count)
    }

    fn put_voucher(&self, voucher: &Voucher) -> Result<()> {
        let mut inner = self.lock()?;
        inner.codes.insert(voucher.code.clone(), voucher.id);
        inner.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    fn get_voucher(&self, code: &str) -> Result<Option<Voucher>> {
        let inner = self.lock()?;
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.vouchers.get(id))
            .cloned())
    }

    fn get_voucher_by_id(&self, id: &VoucherId) -> Result<Option<Voucher>> {
        Ok(self.lock()?.vouchers.get(id).cloned())
    }

    fn get_redemption(&self, id: &RedemptionId) -> Result<Option<VoucherRedemption>> {
        Ok(self.lock()?.redemptions.get(id).cloned())
    }

    fn list_redemptions_by_user(&self, user_id: &UserId) -> Result<Vec<VoucherRedemption>> {
        let inner = self.lock()?;
        Ok(inner
            .redemptions
            .values()
            .filter(|r| r.user_id == *user_id)
            .cloned()
            .collect())
    }

    fn redeem_voucher(
        &self,
        redemption: &VoucherRedemption,
        effect: &RedemptionEffect,
    ) -> Result<()> {
        let mut inner = self.lock()?;

        let voucher = inner
            .vouchers
            .get_mut(&redemption.voucher_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "voucher",
                id: redemption.voucher_id.to_string(),
            })?;

        // Re-check the cap under the lock: validation ran outside it.
        if voucher.is_exhausted() {
            return Err(StoreError::VoucherExhausted {
                code: voucher.code.clone(),
            });
        }
        voucher.current_uses += 1;
        let voucher_id = voucher.id;

        match effect {
            RedemptionEffect::None => {}
            RedemptionEffect::GrantCredits { transaction } => {
                if let Err(err) = apply_grant(&mut inner, transaction) {
                    // Roll the counter back; the redemption must not land
                    // without its grant.
                    if let Some(v) = inner.vouchers.get_mut(&voucher_id) {
                        v.current_uses -= 1;
                    }
                    return Err(err);
                }
            }
            RedemptionEffect::ExtendTrial { days } => {
                let Some(subscription) = inner.subscriptions.get_mut(&redemption.user_id) else {
                    if let Some(v) = inner.vouchers.get_mut(&voucher_id) {
                        v.current_uses -= 1;
                    }
                    return Err(StoreError::NotFound {
                        entity: "subscription",
                        id: redemption.user_id.to_string(),
                    });
                };
                let base = subscription.trial_ends_at.unwrap_or_else(Utc::now);
                subscription.trial_ends_at = Some(base + Duration::days(*days));
                subscription.updated_at = Utc::now();
            }
        }

        inner.redemptions.insert(redemption.id, redemption.clone());
        debug!(redemption_id = %redemption.id, voucher_id = %voucher_id, "redemption recorded");
        Ok(())
    }

    fn revoke_redemption(&self, id: &RedemptionId) -> Result<VoucherRedemption> {
        let mut inner = self.lock()?;

        let redemption = inner
            .redemptions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "redemption",
                id: id.to_string(),
            })?;

        if redemption.status == RedemptionStatus::Revoked {
            return Err(StoreError::RedemptionRevoked { id: id.to_string() });
        }
        redemption.status = RedemptionStatus::Revoked;
        let revoked = redemption.clone();

        if let Some(voucher) = inner.vouchers.get_mut(&revoked.voucher_id) {
            voucher.current_uses = voucher.current_uses.saturating_sub(1);
        }
        debug!(redemption_id = %id, "redemption revoked");

        Ok(revoked)
    }
}
