//! Subscription records and per-tier usage policies.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::UserId;
use crate::usage::UsageKind;

/// Monthly credit allowance for the Plus tier.
pub const PLUS_TIER_CREDITS: i64 = 3000;
/// Monthly credit allowance for the Pro tier.
pub const PRO_TIER_CREDITS: i64 = 10_000;
/// Default daily text-message cap for the free tier.
pub const FREE_TIER_DAILY_TEXT_CAP: u32 = 10;

/// Subscription plan levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// No paid plan. Text chat is capped per day; voice is pay-per-use.
    Free,

    /// Entry paid plan.
    Plus,

    /// Full paid plan.
    Pro,
}

impl SubscriptionTier {
    /// Monthly credit allowance granted on renewal.
    #[must_use]
    pub const fn monthly_credits(&self) -> i64 {
        match self {
            Self::Free => 0,
            Self::Plus => PLUS_TIER_CREDITS,
            Self::Pro => PRO_TIER_CREDITS,
        }
    }

    /// Whether this is a paid tier.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Stable name used in logs and API payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }
}

/// A user's subscription ledger: tier, credit balance, and the daily
/// text-message counter for capped tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// The subscribed user.
    pub user_id: UserId,

    /// Current plan level.
    pub tier: SubscriptionTier,

    /// Credits left in the current period. Never negative; never above
    /// `credits_total` except transiently after a forced deduction.
    pub credits_remaining: i64,

    /// Credits granted for the current period (allowance plus bonuses).
    pub credits_total: i64,

    /// Text messages sent on `daily_count_date`.
    pub daily_text_count: u32,

    /// The day `daily_text_count` refers to; a new day resets the count.
    pub daily_count_date: NaiveDate,

    /// When the trial period ends, for users on a trial.
    pub trial_ends_at: Option<DateTime<Utc>>,

    /// Whether the user has ever held a paid tier. Consulted by
    /// new-users-only voucher eligibility.
    pub has_paid_history: bool,

    /// When the subscription record was created.
    pub created_at: DateTime<Utc>,

    /// When the subscription record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription on the given tier with its monthly allowance.
    #[must_use]
    pub fn new(user_id: UserId, tier: SubscriptionTier) -> Self {
        let now = Utc::now();
        let allowance = tier.monthly_credits();
        Self {
            user_id,
            tier,
            credits_remaining: allowance,
            credits_total: allowance,
            daily_text_count: 0,
            daily_count_date: now.date_naive(),
            trial_ends_at: None,
            has_paid_history: tier.is_paid(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The daily text count as of `today` (zero once the date rolls over).
    #[must_use]
    pub fn daily_text_count_on(&self, today: NaiveDate) -> u32 {
        if self.daily_count_date == today {
            self.daily_text_count
        } else {
            0
        }
    }
}

/// What one tier gets for free and where it is capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Usage kinds that never consume credits on this tier.
    pub unlimited: Vec<UsageKind>,

    /// Daily cap on text messages, when the tier is capped.
    pub daily_text_messages: Option<u32>,
}

impl TierPolicy {
    /// Whether `kind` is unlimited under this policy.
    #[must_use]
    pub fn is_unlimited(&self, kind: UsageKind) -> bool {
        self.unlimited.contains(&kind)
    }
}

/// Per-tier usage policies. Externally maintained configuration, read-only
/// to the billing engine; injected so tests can substitute fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicyTable {
    policies: HashMap<SubscriptionTier, TierPolicy>,
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        let mut policies = HashMap::new();

        // Free users chat for free up to a daily cap; voice is metered.
        policies.insert(
            SubscriptionTier::Free,
            TierPolicy {
                unlimited: vec![UsageKind::TextChat],
                daily_text_messages: Some(FREE_TIER_DAILY_TEXT_CAP),
            },
        );
        // Paid tiers chat without limit; voice draws on the allowance.
        policies.insert(
            SubscriptionTier::Plus,
            TierPolicy {
                unlimited: vec![UsageKind::TextChat],
                daily_text_messages: None,
            },
        );
        policies.insert(
            SubscriptionTier::Pro,
            TierPolicy {
                unlimited: vec![UsageKind::TextChat],
                daily_text_messages: None,
            },
        );

        Self { policies }
    }
}

impl TierPolicyTable {
    /// Build a table from explicit per-tier policies.
    #[must_use]
    pub fn new(policies: HashMap<SubscriptionTier, TierPolicy>) -> Self {
        Self { policies }
    }

    /// The policy for a tier. Tiers absent from the table get everything
    /// metered and uncapped.
    #[must_use]
    pub fn for_tier(&self, tier: SubscriptionTier) -> TierPolicy {
        self.policies.get(&tier).cloned().unwrap_or(TierPolicy {
            unlimited: Vec::new(),
            daily_text_messages: None,
        })
    }
}
