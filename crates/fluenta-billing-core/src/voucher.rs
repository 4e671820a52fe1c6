//! Vouchers, redemptions, and discount computation.
//!
//! A voucher grants a monetary discount (percentage or fixed amount) or a
//! non-monetary effect (bonus credits, trial extension, tier upgrade).
//! Validation rules live in the engine crate; the types and the pure
//! discount math live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RedemptionId, UserId, VoucherId};
use crate::subscription::SubscriptionTier;

/// What a voucher grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherType {
    /// Percentage off the original amount; `value` is the percentage.
    Percentage,

    /// Fixed amount off, clamped to the original; `value` is the amount.
    FixedAmount,

    /// Free credits; `value` is the credit count.
    BonusCredits,

    /// Extra trial days; `value` is the day count.
    TrialExtension,

    /// Upgrade to a higher tier (applied by an external collaborator).
    TierUpgrade,
}

/// A promotional code and its redemption rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    /// Unique voucher id.
    pub id: VoucherId,

    /// The code users type. Stored trimmed and uppercased.
    pub code: String,

    /// What the voucher grants.
    pub voucher_type: VoucherType,

    /// Meaning depends on `voucher_type` (percent, amount, credits, days).
    pub value: i64,

    /// Global redemption cap. `None` means unbounded.
    pub max_uses: Option<u32>,

    /// How many times one user may redeem this code.
    pub uses_per_user: u32,

    /// When the voucher becomes valid.
    pub start_date: DateTime<Utc>,

    /// Last valid day, inclusive through end of day. `None` never expires.
    pub end_date: Option<DateTime<Utc>>,

    /// Tiers the voucher applies to. Empty means all tiers.
    pub applicable_tiers: Vec<SubscriptionTier>,

    /// Subscription durations (months) the voucher applies to, when limited.
    pub allowed_durations_months: Option<Vec<u32>>,

    /// Only redeemable by users with no redemption or paid history.
    pub new_users_only: bool,

    /// Whether this voucher may combine with others in one transaction.
    pub is_stackable: bool,

    /// Whether redeeming this voucher excludes every other exclusive one.
    pub is_exclusive: bool,

    /// Applied redemptions so far. Mutated only together with a redemption
    /// record, never independently.
    pub current_uses: u32,

    /// Kill switch.
    pub is_active: bool,

    /// When the voucher was created.
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// Create an active voucher valid from now, with single-use-per-user
    /// defaults. Admin tooling adjusts the rest field by field.
    #[must_use]
    pub fn new(code: &str, voucher_type: VoucherType, value: i64) -> Self {
        Self {
            id: VoucherId::generate(),
            code: normalize_code(code),
            voucher_type,
            value,
            max_uses: None,
            uses_per_user: 1,
            start_date: Utc::now(),
            end_date: None,
            applicable_tiers: Vec::new(),
            allowed_durations_months: None,
            new_users_only: false,
            is_stackable: true,
            is_exclusive: false,
            current_uses: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether the global cap is exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|cap| self.current_uses >= cap)
    }
}

/// Canonical form of a voucher code: trimmed, uppercased.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// The last instant of a date's day, for inclusive end-of-day expiry.
#[must_use]
pub fn end_of_day(date: DateTime<Utc>) -> DateTime<Utc> {
    // and_hms_micro_opt only fails for out-of-range values; these are fixed.
    date.date_naive()
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap_or_else(|| date.naive_utc())
        .and_utc()
}

/// Record of one user's application of one voucher. Immutable except for
/// the `Applied` → `Revoked` status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherRedemption {
    /// Unique redemption id.
    pub id: RedemptionId,

    /// The redeemed voucher.
    pub voucher_id: VoucherId,

    /// Who redeemed it.
    pub user_id: UserId,

    /// The checkout's subscription reference, when one exists.
    pub subscription_id: Option<String>,

    /// Voucher type at redemption time.
    pub discount_type: VoucherType,

    /// Voucher value at redemption time.
    pub discount_value: i64,

    /// Amount before discount, in the checkout's minor currency unit.
    pub original_amount: i64,

    /// Amount after discount.
    pub final_amount: i64,

    /// Applied or revoked.
    pub status: RedemptionStatus,

    /// When the redemption was recorded.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    /// The redemption is in effect.
    Applied,

    /// The redemption was revoked. Side effects already granted are not
    /// reversed; corrections go through compensating transactions.
    Revoked,
}

/// A non-monetary side effect a voucher carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum VoucherEffect {
    /// Grant this many credits.
    BonusCredits {
        /// Credits to grant.
        credits: i64,
    },

    /// Extend the trial by this many days.
    TrialExtension {
        /// Days to add.
        days: i64,
    },

    /// Upgrade the subscription tier (performed by an external collaborator).
    TierUpgrade,
}

/// What applying a voucher to an amount yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountResult {
    /// Amount taken off the original.
    pub discount_amount: i64,

    /// Amount left to pay.
    pub final_amount: i64,

    /// Side effect to apply, for non-monetary voucher types.
    pub effect: Option<VoucherEffect>,
}

/// Compute the discount a voucher yields on an amount. Pure; mutates nothing.
///
/// Percentage discounts round half-up in integer arithmetic so money never
/// drifts through floats. Fixed amounts clamp to the original.
#[must_use]
pub fn compute_discount(voucher: &Voucher, original_amount: i64) -> DiscountResult {
    match voucher.voucher_type {
        VoucherType::Percentage => {
            let discount = ((original_amount * voucher.value) + 50) / 100;
            let discount = discount.clamp(0, original_amount);
            DiscountResult {
                discount_amount: discount,
                final_amount: original_amount - discount,
                effect: None,
            }
        }
        VoucherType::FixedAmount => {
            let discount = voucher.value.clamp(0, original_amount);
            DiscountResult {
                discount_amount: discount,
                final_amount: original_amount - discount,
                effect: None,
            }
        }
        VoucherType::BonusCredits => DiscountResult {
            discount_amount: 0,
            final_amount: original_amount,
            effect: Some(VoucherEffect::BonusCredits {
                credits: voucher.value,
            }),
        },
        VoucherType::TrialExtension => DiscountResult {
            discount_amount: 0,
            final_amount: original_amount,
            effect: Some(VoucherEffect::TrialExtension {
                days: voucher.value,
            }),
        },
        VoucherType::TierUpgrade => DiscountResult {
            discount_amount: 0,
            final_amount: original_amount,
            effect: Some(VoucherEffect::TierUpgrade),
        },
    }
}

/// Why a voucher cannot be used. One variant per validation rule, so error
/// messages are reproducible: the first failing check wins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VoucherError {
    /// No voucher with that code exists.
    #[error("voucher code not found")]
    NotFound,

    /// The voucher has been deactivated.
    #[error("voucher is inactive")]
    Inactive,

    /// The voucher's start date is in the future.
    #[error("voucher is not yet valid")]
    NotYetValid,

    /// The voucher's end date has passed (end of day, inclusive).
    #[error("voucher has expired")]
    Expired,

    /// The subscription duration is not covered by this voucher.
    #[error("voucher does not apply to this subscription duration")]
    DurationNotAllowed,

    /// The global redemption cap is exhausted.
    #[error("voucher has reached its maximum uses")]
    MaxUsesReached,

    /// This user has exhausted their per-user redemption allowance.
    #[error("voucher already used by this user")]
    AlreadyUsedByUser,

    /// The user fails new-users-only or exclusivity eligibility.
    #[error("user is not eligible for this voucher")]
    NotEligible,

    /// The caller's tier is not covered by this voucher.
    #[error("voucher does not apply to this tier")]
    TierNotApplicable,

    /// A code in a stack is not stackable.
    #[error("voucher {code} cannot be combined with other codes")]
    NotStackable {
        /// The offending code.
        code: String,
    },

    /// A code in a stack is exclusive.
    #[error("voucher {code} is exclusive and must be used alone")]
    ExclusiveConflict {
        /// The offending code.
        code: String,
    },

    /// The redemption to revoke does not exist.
    #[error("redemption not found")]
    RedemptionNotFound,

    /// The redemption was already revoked; `current_uses` is not
    /// decremented twice.
    #[error("redemption already revoked")]
    AlreadyRevoked,
}

impl VoucherError {
    /// Stable machine-readable code for API payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotYetValid => "not_yet_valid",
            Self::Expired => "expired",
            Self::DurationNotAllowed => "duration_not_allowed",
            Self::MaxUsesReached => "max_uses_reached",
            Self::AlreadyUsedByUser => "already_used_by_user",
            Self::NotEligible => "not_eligible",
            Self::TierNotApplicable => "tier_not_applicable",
            Self::NotStackable { .. } => "not_stackable",
            Self::ExclusiveConflict { .. } => "exclusive_conflict",
            Self::RedemptionNotFound => "redemption_not_found",
            Self::AlreadyRevoked => "already_revoked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code("  welcome20 "), "WELCOME20");
        let voucher = Voucher::new("spring-Sale", VoucherType::Percentage, 10);
        assert_eq!(voucher.code, "SPRING-SALE");
    }

    #[test]
    fn percentage_discount_rounds_half_up() {
        let voucher = Voucher::new("P20", VoucherType::Percentage, 20);
        let result = compute_discount(&voucher, 100_000);
        assert_eq!(result.discount_amount, 20_000);
        assert_eq!(result.final_amount, 80_000);
        assert!(result.effect.is_none());

        // 15% of 99 = 14.85 → rounds to 15.
        let voucher = Voucher::new("P15", VoucherType::Percentage, 15);
        let result = compute_discount(&voucher, 99);
        assert_eq!(result.discount_amount, 15);
        assert_eq!(result.final_amount, 84);
    }

    #[test]
    fn fixed_amount_clamps_to_original() {
        let voucher = Voucher::new("F5000", VoucherType::FixedAmount, 5000);
        let result = compute_discount(&voucher, 3000);
        assert_eq!(result.discount_amount, 3000);
        assert_eq!(result.final_amount, 0);
    }

    #[test]
    fn bonus_credits_leave_the_amount_alone() {
        let voucher = Voucher::new("B500", VoucherType::BonusCredits, 500);
        let result = compute_discount(&voucher, 100_000);
        assert_eq!(result.discount_amount, 0);
        assert_eq!(result.final_amount, 100_000);
        assert_eq!(
            result.effect,
            Some(VoucherEffect::BonusCredits { credits: 500 })
        );
    }

    #[test]
    fn trial_extension_effect() {
        let voucher = Voucher::new("T7", VoucherType::TrialExtension, 7);
        let result = compute_discount(&voucher, 0);
        assert_eq!(result.effect, Some(VoucherEffect::TrialExtension { days: 7 }));
    }

    #[test]
    fn end_of_day_is_inclusive() {
        let noon = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let eod = end_of_day(noon);
        assert_eq!(eod.date_naive(), noon.date_naive());
        let just_before_midnight = Utc.with_ymd_and_hms(2026, 3, 15, 23, 59, 59).unwrap();
        assert!(just_before_midnight <= eod);
        let next_day = Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap();
        assert!(next_day > eod);
    }

    #[test]
    fn exhaustion_respects_missing_cap() {
        let mut voucher = Voucher::new("CAP", VoucherType::Percentage, 10);
        voucher.current_uses = 1_000_000;
        assert!(!voucher.is_exhausted());
        voucher.max_uses = Some(1_000_000);
        assert!(voucher.is_exhausted());
    }
}
