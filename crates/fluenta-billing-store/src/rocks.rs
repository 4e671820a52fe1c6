//! `RocksDB` storage implementation.
//!
//! Compound operations serialize through a single write lock: RocksDB's
//! `WriteBatch` makes the writes atomic, but the conditional checks
//! (balance, voucher cap, revocation status) read current state first, and
//! the lock keeps a concurrent batch from landing between the read and the
//! write.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, NaiveDate, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use tracing::debug;

use fluenta_billing_core::{
    CreditTransaction, RedemptionId, RedemptionStatus, Subscription, TransactionId, UserId,
    Voucher, VoucherId, VoucherRedemption,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{RedemptionEffect, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".to_string()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn require_subscription(&self, user_id: &UserId) -> Result<Subscription> {
        self.get_subscription(user_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                id: user_id.to_string(),
            })
    }

    /// Stage the subscription update plus the transaction record and its
    /// user index into one batch.
    fn stage_ledger_write(
        &self,
        batch: &mut WriteBatch,
        subscription: &Subscription,
        transaction: &CreditTransaction,
    ) -> Result<()> {
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        batch.put_cf(
            &cf_subs,
            keys::subscription_key(&subscription.user_id),
            Self::serialize(subscription)?,
        );
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&transaction.id),
            Self::serialize(transaction)?,
        );
        batch.put_cf(
            &cf_tx_by_user,
            keys::user_transaction_key(&transaction.user_id, &transaction.id),
            [],
        );
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        self.db
            .put_cf(
                &cf,
                keys::subscription_key(&subscription.user_id),
                Self::serialize(subscription)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        self.db
            .get_cf(&cf, keys::subscription_key(user_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<CreditTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;
        self.db
            .get_cf(&cf, keys::transaction_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);

        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // ULID index keys are time-ordered; collect then reverse for
        // newest-first.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id_from_user_key(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Compound Ledger Operations
    // =========================================================================

    fn charge_credits(&self, transaction: &CreditTransaction, force: bool) -> Result<i64> {
        let _guard = self.lock_writes()?;

        let amount = transaction.amount.abs();
        let mut subscription = self.require_subscription(&transaction.user_id)?;

        if !force && subscription.credits_remaining < amount {
            return Err(StoreError::InsufficientCredits {
                available: subscription.credits_remaining,
                required: amount,
            });
        }

        subscription.credits_remaining = (subscription.credits_remaining - amount).max(0);
        subscription.updated_at = Utc::now();

        let mut stored = transaction.clone();
        stored.balance_after = subscription.credits_remaining;

        let mut batch = WriteBatch::default();
        self.stage_ledger_write(&mut batch, &subscription, &stored)?;
        self.write(batch)?;

        debug!(
            user_id = %transaction.user_id,
            amount = transaction.amount,
            balance = subscription.credits_remaining,
            "charge applied"
        );
        Ok(subscription.credits_remaining)
    }

    fn add_credits(&self, transaction: &CreditTransaction) -> Result<i64> {
        let _guard = self.lock_writes()?;

        let amount = transaction.amount.abs();
        let mut subscription = self.require_subscription(&transaction.user_id)?;

        subscription.credits_remaining += amount;
        subscription.credits_total += amount;
        subscription.updated_at = Utc::now();

        let mut stored = transaction.clone();
        stored.balance_after = subscription.credits_remaining;

        let mut batch = WriteBatch::default();
        self.stage_ledger_write(&mut batch, &subscription, &stored)?;
        self.write(batch)?;

        debug!(
            user_id = %transaction.user_id,
            amount = transaction.amount,
            balance = subscription.credits_remaining,
            "grant applied"
        );
        Ok(subscription.credits_remaining)
    }

    fn bump_daily_text_count(
        &self,
        user_id: &UserId,
        today: NaiveDate,
        count: u32,
        limit: Option<u32>,
    ) -> Result<u32> {
        let _guard = self.lock_writes()?;

        let mut subscription = self.require_subscription(user_id)?;
        let used = if subscription.daily_count_date == today {
            subscription.daily_text_count
        } else {
            0
        };
        // Cap check and write both run under the write lock.
        if let Some(limit) = limit {
            if used + count > limit {
                return Err(StoreError::DailyCapReached { used, limit });
            }
        }
        subscription.daily_count_date = today;
        subscription.daily_text_count = used + count;
        subscription.updated_at = Utc::now();

        self.put_subscription(&subscription)?;
        debug!(user_id = %user_id, count = subscription.daily_text_count, "daily text count bumped");
        Ok(subscription.daily_text_count)
    }

    // =========================================================================
    // Voucher Operations
    // =========================================================================

    fn put_voucher(&self, voucher: &Voucher) -> Result<()> {
        let cf_vouchers = self.cf(cf::VOUCHERS)?;
        let cf_codes = self.cf(cf::VOUCHER_CODES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_vouchers,
            keys::voucher_key(&voucher.id),
            Self::serialize(voucher)?,
        );
        batch.put_cf(
            &cf_codes,
            keys::voucher_code_key(&voucher.code),
            voucher.id.as_bytes(),
        );
        self.write(batch)
    }

    fn get_voucher(&self, code: &str) -> Result<Option<Voucher>> {
        let cf_codes = self.cf(cf::VOUCHER_CODES)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf_codes, keys::voucher_code_key(code))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if id_bytes.len() != 16 {
            return Err(StoreError::Serialization(format!(
                "bad voucher id index entry for code {code}"
            )));
        }
        bytes.copy_from_slice(&id_bytes);
        self.get_voucher_by_id(&VoucherId::from_bytes(bytes))
    }

    fn get_voucher_by_id(&self, id: &VoucherId) -> Result<Option<Voucher>> {
        let cf = self.cf(cf::VOUCHERS)?;
        self.db
            .get_cf(&cf, keys::voucher_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Redemption Operations
    // =========================================================================

    fn get_redemption(&self, id: &RedemptionId) -> Result<Option<VoucherRedemption>> {
        let cf = self.cf(cf::REDEMPTIONS)?;
        self.db
            .get_cf(&cf, keys::redemption_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_redemptions_by_user(&self, user_id: &UserId) -> Result<Vec<VoucherRedemption>> {
        let cf_by_user = self.cf(cf::REDEMPTIONS_BY_USER)?;
        let prefix = keys::user_redemptions_prefix(user_id);

        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut redemptions = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let redemption_id = keys::extract_redemption_id_from_user_key(&key);
            if let Some(redemption) = self.get_redemption(&redemption_id)? {
                redemptions.push(redemption);
            }
        }

        Ok(redemptions)
    }

    // =========================================================================
    // Compound Voucher Operations
    // =========================================================================

    fn redeem_voucher(
        &self,
        redemption: &VoucherRedemption,
        effect: &RedemptionEffect,
    ) -> Result<()> {
        let _guard = self.lock_writes()?;

        let mut voucher = self
            .get_voucher_by_id(&redemption.voucher_id)?
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

        let cf_vouchers = self.cf(cf::VOUCHERS)?;
        let cf_redemptions = self.cf(cf::REDEMPTIONS)?;
        let cf_by_user = self.cf(cf::REDEMPTIONS_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_vouchers,
            keys::voucher_key(&voucher.id),
            Self::serialize(&voucher)?,
        );

        // Effects are staged into the same batch; any failure here returns
        // before the write, so nothing lands.
        match effect {
            RedemptionEffect::None => {}
            RedemptionEffect::GrantCredits { transaction } => {
                let amount = transaction.amount.abs();
                let mut subscription = self.require_subscription(&redemption.user_id)?;
                subscription.credits_remaining += amount;
                subscription.credits_total += amount;
                subscription.updated_at = Utc::now();

                let mut stored = transaction.clone();
                stored.balance_after = subscription.credits_remaining;
                self.stage_ledger_write(&mut batch, &subscription, &stored)?;
            }
            RedemptionEffect::ExtendTrial { days } => {
                let mut subscription = self.require_subscription(&redemption.user_id)?;
                let base = subscription.trial_ends_at.unwrap_or_else(Utc::now);
                subscription.trial_ends_at = Some(base + Duration::days(*days));
                subscription.updated_at = Utc::now();

                let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
                batch.put_cf(
                    &cf_subs,
                    keys::subscription_key(&subscription.user_id),
                    Self::serialize(&subscription)?,
                );
            }
        }

        batch.put_cf(
            &cf_redemptions,
            keys::redemption_key(&redemption.id),
            Self::serialize(redemption)?,
        );
        batch.put_cf(
            &cf_by_user,
            keys::user_redemption_key(&redemption.user_id, &redemption.id),
            [],
        );

        self.write(batch)?;
        debug!(redemption_id = %redemption.id, voucher_id = %voucher.id, "redemption recorded");
        Ok(())
    }

    fn revoke_redemption(&self, id: &RedemptionId) -> Result<VoucherRedemption> {
        let _guard = self.lock_writes()?;

        let mut redemption = self
            .get_redemption(id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "redemption",
                id: id.to_string(),
            })?;

        if redemption.status == RedemptionStatus::Revoked {
            return Err(StoreError::RedemptionRevoked { id: id.to_string() });
        }
        redemption.status = RedemptionStatus::Revoked;

        let cf_redemptions = self.cf(cf::REDEMPTIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_redemptions,
            keys::redemption_key(&redemption.id),
            Self::serialize(&redemption)?,
        );

        if let Some(mut voucher) = self.get_voucher_by_id(&redemption.voucher_id)? {
            voucher.current_uses = voucher.current_uses.saturating_sub(1);
            let cf_vouchers = self.cf(cf::VOUCHERS)?;
            batch.put_cf(
                &cf_vouchers,
                keys::voucher_key(&voucher.id),
                Self::serialize(&voucher)?,
            );
        }

        self.write(batch)?;
        debug!(redemption_id = %id, "redemption revoked");
        Ok(redemption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluenta_billing_core::{SubscriptionTier, VoucherType};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn seeded_subscription(store: &RocksStore, credits: i64) -> UserId {
        let user_id = UserId::generate();
        let mut sub = Subscription::new(user_id, SubscriptionTier::Plus);
        sub.credits_remaining = credits;
        sub.credits_total = credits;
        store.put_subscription(&sub).unwrap();
        user_id
    }

    #[test]
    fn subscription_crud_and_charge() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 5000);

        let retrieved = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(retrieved.credits_remaining, 5000);

        let tx = CreditTransaction::charge(user_id, 100, "sess", "chat", "usage");
        let balance = store.charge_credits(&tx, false).unwrap();
        assert_eq!(balance, 4900);

        let stored = store.get_transaction(&tx.id).unwrap().unwrap();
        assert_eq!(stored.balance_after, 4900);
    }

    #[test]
    fn charge_refuses_overdraw() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 5);

        let tx = CreditTransaction::charge(user_id, 100, "sess", "chat", "usage");
        let result = store.charge_credits(&tx, false);
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                available: 5,
                required: 100
            })
        ));
        // Nothing landed.
        assert!(store.get_transaction(&tx.id).unwrap().is_none());
        let sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.credits_remaining, 5);
    }

    #[test]
    fn transactions_list_newest_first() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 1000);

        let tx1 = CreditTransaction::charge(user_id, 10, "first", "chat", "usage");
        store.charge_credits(&tx1, false).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2)); // distinct ULID timestamps

        let tx2 = CreditTransaction::charge(user_id, 20, "second", "chat", "usage");
        store.charge_credits(&tx2, false).unwrap();

        let transactions = store.list_transactions_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].reference_id, "second");
        assert_eq!(transactions[1].reference_id, "first");

        let page2 = store.list_transactions_by_user(&user_id, 1, 1).unwrap();
        assert_eq!(page2[0].reference_id, "first");
    }

    #[test]
    fn voucher_lookup_by_code_and_redeem() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 0);

        let mut voucher = Voucher::new("SPRING20", VoucherType::BonusCredits, 500);
        voucher.max_uses = Some(1);
        store.put_voucher(&voucher).unwrap();

        let found = store.get_voucher("SPRING20").unwrap().unwrap();
        assert_eq!(found.id, voucher.id);
        assert!(store.get_voucher("MISSING").unwrap().is_none());

        let redemption = VoucherRedemption {
            id: RedemptionId::generate(),
            voucher_id: voucher.id,
            user_id,
            subscription_id: None,
            discount_type: voucher.voucher_type,
            discount_value: voucher.value,
            original_amount: 0,
            final_amount: 0,
            status: RedemptionStatus::Applied,
            created_at: Utc::now(),
        };
        let tx = CreditTransaction::bonus(
            user_id,
            500,
            redemption.id.to_string(),
            "voucher",
            "promo",
        );
        store
            .redeem_voucher(
                &redemption,
                &RedemptionEffect::GrantCredits { transaction: tx },
            )
            .unwrap();

        let sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.credits_remaining, 500);
        assert_eq!(
            store.get_voucher("SPRING20").unwrap().unwrap().current_uses,
            1
        );

        // Cap is spent.
        let second = VoucherRedemption {
            id: RedemptionId::generate(),
            user_id: seeded_subscription(&store, 0),
            ..redemption.clone()
        };
        let result = store.redeem_voucher(&second, &RedemptionEffect::None);
        assert!(matches!(result, Err(StoreError::VoucherExhausted { .. })));
    }

    #[test]
    fn daily_count_bump_is_conditional_on_the_cap() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 0);
        let today = Utc::now().date_naive();

        assert_eq!(
            store
                .bump_daily_text_count(&user_id, today, 9, Some(10))
                .unwrap(),
            9
        );
        let err = store
            .bump_daily_text_count(&user_id, today, 2, Some(10))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DailyCapReached { used: 9, limit: 10 }
        ));
        // The refused bump left the counter alone.
        let sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.daily_text_count, 9);
    }

    #[test]
    fn revoke_once_only() {
        let (store, _dir) = create_test_store();
        let user_id = seeded_subscription(&store, 0);
        let voucher = Voucher::new("R1", VoucherType::Percentage, 10);
        store.put_voucher(&voucher).unwrap();

        let redemption = VoucherRedemption {
            id: RedemptionId::generate(),
            voucher_id: voucher.id,
            user_id,
            subscription_id: None,
            discount_type: voucher.voucher_type,
            discount_value: voucher.value,
            original_amount: 1000,
            final_amount: 900,
            status: RedemptionStatus::Applied,
            created_at: Utc::now(),
        };
        store
            .redeem_voucher(&redemption, &RedemptionEffect::None)
            .unwrap();

        let revoked = store.revoke_redemption(&redemption.id).unwrap();
        assert_eq!(revoked.status, RedemptionStatus::Revoked);
        assert_eq!(store.get_voucher("R1").unwrap().unwrap().current_uses, 0);

        let again = store.revoke_redemption(&redemption.id);
        assert!(matches!(again, Err(StoreError::RedemptionRevoked { .. })));
        assert_eq!(store.get_voucher("R1").unwrap().unwrap().current_uses, 0);
    }

    #[test]
    fn reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        let user_id;
        {
            let store = RocksStore::open(dir.path()).unwrap();
            user_id = seeded_subscription(&store, 250);
        }
        let store = RocksStore::open(dir.path()).unwrap();
        let sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.credits_remaining, 250);
    }
}
