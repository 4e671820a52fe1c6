//! Voucher validation and transactional redemption.
//!
//! Validation runs a fixed rule order so a voucher failing several rules
//! always reports the same reason: not found, inactive, not yet valid,
//! expired, duration, global cap, per-user allowance, eligibility
//! (new-users-only, then exclusivity), tier. The global cap is re-checked
//! inside the store when the redemption commits, so validation passing is
//! never a reservation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use fluenta_billing_core::{
    compute_discount, end_of_day, normalize_code, CreditTransaction, DiscountResult,
    RedemptionId, RedemptionStatus, SubscriptionTier, UserId, Voucher, VoucherEffect,
    VoucherError, VoucherRedemption,
};
use fluenta_billing_store::{RedemptionEffect, Store};

use crate::error::{BillingError, Result};

/// Checkout details a redemption is evaluated against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedemptionContext {
    /// Amount before discount, in the checkout's minor currency unit.
    /// Zero for non-monetary vouchers redeemed outside a checkout.
    #[serde(default)]
    pub original_amount: i64,

    /// Subscription duration being purchased, when one is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_months: Option<u32>,

    /// The checkout's subscription reference, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

/// What applying a voucher produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    /// The recorded redemption.
    pub redemption: VoucherRedemption,

    /// The discount and side effect that were applied.
    pub discount: DiscountResult,
}

/// Validates and applies promotional codes over a shared store.
pub struct VoucherEngine {
    store: Arc<dyn Store>,
}

impl VoucherEngine {
    /// Create an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate a code for a user right now. Returns the voucher and the
    /// discount it would yield; mutates nothing.
    ///
    /// # Errors
    ///
    /// The first failing rule's `VoucherError`, or a storage error.
    pub fn validate(
        &self,
        code: &str,
        user_id: &UserId,
        context: &RedemptionContext,
    ) -> Result<(Voucher, DiscountResult)> {
        self.validate_at(code, user_id, context, Utc::now())
    }

    /// `validate` with an explicit clock, for date-window rules.
    ///
    /// # Errors
    ///
    /// The first failing rule's `VoucherError`, or a storage error.
    pub fn validate_at(
        &self,
        code: &str,
        user_id: &UserId,
        context: &RedemptionContext,
        now: DateTime<Utc>,
    ) -> Result<(Voucher, DiscountResult)> {
        let code = normalize_code(code);
        let voucher = self
            .store
            .get_voucher(&code)?
            .ok_or(VoucherError::NotFound)?;

        if !voucher.is_active {
            return Err(VoucherError::Inactive.into());
        }
        if now < voucher.start_date {
            return Err(VoucherError::NotYetValid.into());
        }
        if let Some(end) = voucher.end_date {
            if now > end_of_day(end) {
                return Err(VoucherError::Expired.into());
            }
        }
        // Duration-limited vouchers only constrain checkouts that carry a
        // duration; a redemption outside a checkout skips the rule.
        if let (Some(allowed), Some(months)) =
            (&voucher.allowed_durations_months, context.duration_months)
        {
            if !allowed.contains(&months) {
                return Err(VoucherError::DurationNotAllowed.into());
            }
        }
        if voucher.is_exhausted() {
            return Err(VoucherError::MaxUsesReached.into());
        }

        let redemptions = self.store.list_redemptions_by_user(user_id)?;
        let applied: Vec<&VoucherRedemption> = redemptions
            .iter()
            .filter(|r| r.status == RedemptionStatus::Applied)
            .collect();

        let own_uses = applied
            .iter()
            .filter(|r| r.voucher_id == voucher.id)
            .count();
        if own_uses >= voucher.uses_per_user as usize {
            return Err(VoucherError::AlreadyUsedByUser.into());
        }

        let subscription = self.store.get_subscription(user_id)?;
        if voucher.new_users_only {
            let has_history = !applied.is_empty()
                || subscription.as_ref().is_some_and(|s| s.has_paid_history);
            if has_history {
                return Err(VoucherError::NotEligible.into());
            }
        }
        if voucher.is_exclusive && self.holds_other_exclusive(&voucher, &applied)? {
            return Err(VoucherError::NotEligible.into());
        }

        if !voucher.applicable_tiers.is_empty() {
            let tier = subscription
                .as_ref()
                .map_or(SubscriptionTier::Free, |s| s.tier);
            if !voucher.applicable_tiers.contains(&tier) {
                return Err(VoucherError::TierNotApplicable.into());
            }
        }

        let discount = compute_discount(&voucher, context.original_amount);
        Ok((voucher, discount))
    }

    /// Apply a code: validate, compute the discount, and commit the
    /// redemption with its side effect as one store transaction.
    ///
    /// # Errors
    ///
    /// A `VoucherError` when validation (or the store's cap re-check)
    /// rejects the code, or a storage error.
    pub fn apply(
        &self,
        code: &str,
        user_id: &UserId,
        context: &RedemptionContext,
    ) -> Result<RedemptionOutcome> {
        let (voucher, discount) = self.validate(code, user_id, context)?;

        let redemption = VoucherRedemption {
            id: RedemptionId::generate(),
            voucher_id: voucher.id,
            user_id: *user_id,
            subscription_id: context.subscription_id.clone(),
            discount_type: voucher.voucher_type,
            discount_value: voucher.value,
            original_amount: context.original_amount,
            final_amount: discount.final_amount,
            status: RedemptionStatus::Applied,
            created_at: Utc::now(),
        };

        let effect = match discount.effect {
            Some(VoucherEffect::BonusCredits { credits }) => RedemptionEffect::GrantCredits {
                transaction: CreditTransaction::bonus(
                    *user_id,
                    credits,
                    redemption.id.to_string(),
                    "voucher",
                    format!("voucher {}", voucher.code),
                ),
            },
            Some(VoucherEffect::TrialExtension { days }) => {
                RedemptionEffect::ExtendTrial { days }
            }
            // Tier upgrades are performed by the subscription collaborator;
            // the redemption record alone is our part.
            Some(VoucherEffect::TierUpgrade) | None => RedemptionEffect::None,
        };

        self.store.redeem_voucher(&redemption, &effect)?;
        info!(
            user_id = %user_id,
            code = %voucher.code,
            redemption_id = %redemption.id,
            "voucher applied"
        );

        Ok(RedemptionOutcome {
            redemption,
            discount,
        })
    }

    /// Revoke a redemption, freeing its slot in the voucher's global cap.
    /// Side effects already granted are not reversed.
    ///
    /// # Errors
    ///
    /// `VoucherError::RedemptionNotFound`, `VoucherError::AlreadyRevoked`,
    /// or a storage error.
    pub fn revoke(&self, redemption_id: &RedemptionId) -> Result<VoucherRedemption> {
        let revoked = self
            .store
            .revoke_redemption(redemption_id)
            .map_err(|err| match err {
                fluenta_billing_store::StoreError::NotFound { .. } => {
                    BillingError::Voucher(VoucherError::RedemptionNotFound)
                }
                other => other.into(),
            })?;
        info!(redemption_id = %redemption_id, "redemption revoked");
        Ok(revoked)
    }

    /// Whether a set of codes may be used together in one transaction.
    /// A single code always may; in a set of two or more, every code must
    /// be stackable and none exclusive.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown code, `NotStackable` or
    /// `ExclusiveConflict` naming the offending code, or a storage error.
    pub fn can_stack(&self, codes: &[&str]) -> Result<()> {
        let mut vouchers = Vec::with_capacity(codes.len());
        for code in codes {
            let code = normalize_code(code);
            let voucher = self
                .store
                .get_voucher(&code)?
                .ok_or(VoucherError::NotFound)?;
            vouchers.push(voucher);
        }

        if vouchers.len() < 2 {
            return Ok(());
        }
        for voucher in &vouchers {
            if !voucher.is_stackable {
                return Err(VoucherError::NotStackable {
                    code: voucher.code.clone(),
                }
                .into());
            }
            if voucher.is_exclusive {
                return Err(VoucherError::ExclusiveConflict {
                    code: voucher.code.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// A user's redemption history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn redemptions(&self, user_id: &UserId) -> Result<Vec<VoucherRedemption>> {
        Ok(self.store.list_redemptions_by_user(user_id)?)
    }

    /// Whether any of the user's applied redemptions is for a different
    /// exclusive voucher.
    fn holds_other_exclusive(
        &self,
        voucher: &Voucher,
        applied: &[&VoucherRedemption],
    ) -> Result<bool> {
        for redemption in applied {
            if redemption.voucher_id == voucher.id {
                continue;
            }
            if let Some(other) = self.store.get_voucher_by_id(&redemption.voucher_id)? {
                if other.is_exclusive {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fluenta_billing_core::{Subscription, VoucherType};
    use fluenta_billing_store::MemoryStore;

    struct Fixture {
        engine: VoucherEngine,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            engine: VoucherEngine::new(store.clone()),
            store,
        }
    }

    fn user_on(store: &MemoryStore, tier: SubscriptionTier) -> UserId {
        let user_id = UserId::generate();
        store
            .put_subscription(&Subscription::new(user_id, tier))
            .unwrap();
        user_id
    }

    fn unwrap_voucher_error(err: BillingError) -> VoucherError {
        match err {
            BillingError::Voucher(inner) => inner,
            other => panic!("expected voucher error, got {other:?}"),
        }
    }

    #[test]
    fn codes_validate_case_insensitively() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Free);
        f.store
            .put_voucher(&Voucher::new("WELCOME20", VoucherType::Percentage, 20))
            .unwrap();

        let (voucher, discount) = f
            .engine
            .validate("  welcome20 ", &user_id, &RedemptionContext {
                original_amount: 1000,
                ..RedemptionContext::default()
            })
            .unwrap();
        assert_eq!(voucher.code, "WELCOME20");
        assert_eq!(discount.discount_amount, 200);
        assert_eq!(discount.final_amount, 800);
    }

    #[test]
    fn validation_rule_order_is_stable() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Free);
        let ctx = RedemptionContext::default();

        let err = f.engine.validate("NOPE", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::NotFound);

        // Inactive wins over expired: both hold, inactive is reported.
        let mut voucher = Voucher::new("DEAD", VoucherType::Percentage, 10);
        voucher.is_active = false;
        voucher.end_date = Some(Utc::now() - Duration::days(30));
        f.store.put_voucher(&voucher).unwrap();
        let err = f.engine.validate("DEAD", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::Inactive);

        let mut voucher = Voucher::new("SOON", VoucherType::Percentage, 10);
        voucher.start_date = Utc::now() + Duration::days(7);
        f.store.put_voucher(&voucher).unwrap();
        let err = f.engine.validate("SOON", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::NotYetValid);

        let mut voucher = Voucher::new("GONE", VoucherType::Percentage, 10);
        voucher.start_date = Utc::now() - Duration::days(60);
        voucher.end_date = Some(Utc::now() - Duration::days(30));
        f.store.put_voucher(&voucher).unwrap();
        let err = f.engine.validate("GONE", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::Expired);
    }

    #[test]
    fn expiry_is_inclusive_through_end_of_day() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Free);
        let ctx = RedemptionContext::default();

        let mut voucher = Voucher::new("LASTDAY", VoucherType::Percentage, 10);
        voucher.start_date = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        voucher.end_date = Some(Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap());
        f.store.put_voucher(&voucher).unwrap();

        // Still valid late on the end date.
        let late = Utc.with_ymd_and_hms(2026, 3, 15, 23, 30, 0).unwrap();
        assert!(f.engine.validate_at("LASTDAY", &user_id, &ctx, late).is_ok());

        // Invalid the next morning.
        let next = Utc.with_ymd_and_hms(2026, 3, 16, 0, 30, 0).unwrap();
        let err = f
            .engine
            .validate_at("LASTDAY", &user_id, &ctx, next)
            .unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::Expired);
    }

    #[test]
    fn duration_restriction() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Free);

        let mut voucher = Voucher::new("ANNUAL", VoucherType::Percentage, 25);
        voucher.allowed_durations_months = Some(vec![12]);
        f.store.put_voucher(&voucher).unwrap();

        let monthly = RedemptionContext {
            duration_months: Some(1),
            ..RedemptionContext::default()
        };
        let err = f.engine.validate("ANNUAL", &user_id, &monthly).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::DurationNotAllowed);

        // No duration in context means the rule does not apply.
        let none = RedemptionContext::default();
        assert!(f.engine.validate("ANNUAL", &user_id, &none).is_ok());

        let annual = RedemptionContext {
            duration_months: Some(12),
            ..RedemptionContext::default()
        };
        assert!(f.engine.validate("ANNUAL", &user_id, &annual).is_ok());
    }

    #[test]
    fn per_user_allowance_counts_applied_only() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Plus);
        let ctx = RedemptionContext::default();

        let voucher = Voucher::new("ONEPER", VoucherType::BonusCredits, 100);
        f.store.put_voucher(&voucher).unwrap();

        let outcome = f.engine.apply("ONEPER", &user_id, &ctx).unwrap();
        let err = f.engine.apply("ONEPER", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::AlreadyUsedByUser);

        // Revoking frees the per-user allowance again.
        f.engine.revoke(&outcome.redemption.id).unwrap();
        assert!(f.engine.apply("ONEPER", &user_id, &ctx).is_ok());
    }

    #[test]
    fn new_users_only_rejects_history() {
        let f = fixture();
        let ctx = RedemptionContext::default();

        let mut voucher = Voucher::new("FRESH", VoucherType::Percentage, 50);
        voucher.new_users_only = true;
        f.store.put_voucher(&voucher).unwrap();

        // Paid history disqualifies.
        let paid = user_on(&f.store, SubscriptionTier::Plus);
        let err = f.engine.validate("FRESH", &paid, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::NotEligible);

        // A free user with no redemptions qualifies.
        let fresh = user_on(&f.store, SubscriptionTier::Free);
        assert!(f.engine.validate("FRESH", &fresh, &ctx).is_ok());

        // A prior redemption disqualifies too.
        f.store
            .put_voucher(&Voucher::new("OTHER", VoucherType::Percentage, 10))
            .unwrap();
        f.engine.apply("OTHER", &fresh, &ctx).unwrap();
        let err = f.engine.validate("FRESH", &fresh, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::NotEligible);
    }

    #[test]
    fn tier_restriction() {
        let f = fixture();
        let ctx = RedemptionContext::default();

        let mut voucher = Voucher::new("PROONLY", VoucherType::Percentage, 30);
        voucher.applicable_tiers = vec![SubscriptionTier::Pro];
        f.store.put_voucher(&voucher).unwrap();

        let plus = user_on(&f.store, SubscriptionTier::Plus);
        let err = f.engine.validate("PROONLY", &plus, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::TierNotApplicable);

        let pro = user_on(&f.store, SubscriptionTier::Pro);
        assert!(f.engine.validate("PROONLY", &pro, &ctx).is_ok());
    }

    #[test]
    fn bonus_credits_apply_grants_the_balance() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Plus);

        f.store
            .put_voucher(&Voucher::new("B500", VoucherType::BonusCredits, 500))
            .unwrap();
        let outcome = f
            .engine
            .apply("B500", &user_id, &RedemptionContext::default())
            .unwrap();
        assert_eq!(
            outcome.discount.effect,
            Some(VoucherEffect::BonusCredits { credits: 500 })
        );

        let sub = f.store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.credits_remaining, 3500);
        assert_eq!(sub.credits_total, 3500);

        // The grant is on the books as a transaction.
        let transactions = f.store.list_transactions_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].amount, 500);
    }

    #[test]
    fn trial_extension_apply_moves_the_date() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Free);

        f.store
            .put_voucher(&Voucher::new("T14", VoucherType::TrialExtension, 14))
            .unwrap();
        f.engine
            .apply("T14", &user_id, &RedemptionContext::default())
            .unwrap();

        let sub = f.store.get_subscription(&user_id).unwrap().unwrap();
        let ends = sub.trial_ends_at.unwrap();
        assert!(ends > Utc::now() + Duration::days(13));
    }

    #[test]
    fn revoke_is_idempotent_and_keeps_granted_credits() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Plus);

        f.store
            .put_voucher(&Voucher::new("B100", VoucherType::BonusCredits, 100))
            .unwrap();
        let outcome = f
            .engine
            .apply("B100", &user_id, &RedemptionContext::default())
            .unwrap();

        let revoked = f.engine.revoke(&outcome.redemption.id).unwrap();
        assert_eq!(revoked.status, RedemptionStatus::Revoked);

        // Granted credits stay; corrections are compensating transactions.
        let sub = f.store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.credits_remaining, 3100);

        let err = f.engine.revoke(&outcome.redemption.id).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::AlreadyRevoked);

        let err = f.engine.revoke(&RedemptionId::generate()).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::RedemptionNotFound);
    }

    #[test]
    fn stacking_rules() {
        let f = fixture();

        f.store
            .put_voucher(&Voucher::new("STACK1", VoucherType::Percentage, 10))
            .unwrap();
        f.store
            .put_voucher(&Voucher::new("STACK2", VoucherType::FixedAmount, 200))
            .unwrap();
        let mut solo = Voucher::new("SOLO", VoucherType::Percentage, 50);
        solo.is_stackable = false;
        f.store.put_voucher(&solo).unwrap();
        let mut exclusive = Voucher::new("ALONE", VoucherType::Percentage, 90);
        exclusive.is_exclusive = true;
        f.store.put_voucher(&exclusive).unwrap();

        assert!(f.engine.can_stack(&["STACK1", "STACK2"]).is_ok());
        // A single code is always fine, stackable or not.
        assert!(f.engine.can_stack(&["SOLO"]).is_ok());
        assert!(f.engine.can_stack(&["ALONE"]).is_ok());

        let err = f.engine.can_stack(&["STACK1", "SOLO"]).unwrap_err();
        assert_eq!(
            unwrap_voucher_error(err),
            VoucherError::NotStackable {
                code: "SOLO".into()
            }
        );
        let err = f.engine.can_stack(&["STACK1", "ALONE"]).unwrap_err();
        assert_eq!(
            unwrap_voucher_error(err),
            VoucherError::ExclusiveConflict {
                code: "ALONE".into()
            }
        );
    }

    #[test]
    fn exclusive_voucher_blocks_a_second_exclusive() {
        let f = fixture();
        let user_id = user_on(&f.store, SubscriptionTier::Plus);
        let ctx = RedemptionContext::default();

        let mut first = Voucher::new("EX1", VoucherType::Percentage, 40);
        first.is_exclusive = true;
        f.store.put_voucher(&first).unwrap();
        let mut second = Voucher::new("EX2", VoucherType::Percentage, 40);
        second.is_exclusive = true;
        f.store.put_voucher(&second).unwrap();

        f.engine.apply("EX1", &user_id, &ctx).unwrap();
        let err = f.engine.validate("EX2", &user_id, &ctx).unwrap_err();
        assert_eq!(unwrap_voucher_error(err), VoucherError::NotEligible);
    }

    #[test]
    fn concurrent_redemptions_respect_the_global_cap() {
        let f = fixture();
        let user_a = user_on(&f.store, SubscriptionTier::Plus);
        let user_b = user_on(&f.store, SubscriptionTier::Plus);

        let mut voucher = Voucher::new("LAST1", VoucherType::BonusCredits, 100);
        voucher.max_uses = Some(1);
        f.store.put_voucher(&voucher).unwrap();

        let engine = Arc::new(f.engine);
        let mut handles = Vec::new();
        for user_id in [user_a, user_b] {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                engine.apply("LAST1", &user_id, &RedemptionContext::default())
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(BillingError::Voucher(VoucherError::MaxUsesReached))
        )));

        assert_eq!(
            f.store.get_voucher("LAST1").unwrap().unwrap().current_uses,
            1
        );
        // Exactly one user got the credits.
        let a = f.store.get_subscription(&user_a).unwrap().unwrap();
        let b = f.store.get_subscription(&user_b).unwrap().unwrap();
        assert_eq!(a.credits_remaining + b.credits_remaining, 3000 + 3000 + 100);
    }
}
