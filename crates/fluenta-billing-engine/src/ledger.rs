//! The credit ledger: pricing, tier policy enforcement, and deduction.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fluenta_billing_core::{
    CreditCalculator, CreditTransaction, PricingRegistry, PricingRule, Subscription,
    SubscriptionTier, TierPolicy, TierPolicyTable, UsageCharge, UsageEvent, UsageKind, UserId,
};
use fluenta_billing_store::Store;

use crate::error::{BillingError, Result};

/// Why a pre-flight check denied usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The balance cannot cover the estimate.
    InsufficientCredits,

    /// The free-tier daily text cap is spent.
    DailyLimitReached,
}

/// Result of a pre-flight balance check. Advisory only: the authoritative
/// decision happens inside the store when the deduction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCheck {
    /// Whether the usage would be allowed right now.
    pub allowed: bool,

    /// Whether the kind is unlimited on the user's tier.
    pub unlimited: bool,

    /// Estimated credit cost (zero for unlimited kinds).
    pub credits_required: i64,

    /// Credits currently remaining.
    pub credits_available: i64,

    /// Populated when `allowed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

/// What a completed deduction recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReceipt {
    /// The ledger transaction that was appended (zero-amount for unlimited
    /// usage, so unlimited sessions stay auditable).
    pub transaction: CreditTransaction,

    /// The priced charge, including the per-component breakdown.
    pub charge: UsageCharge,

    /// Balance after the deduction.
    pub balance_after: i64,

    /// Whether the session was covered by an unlimited tier policy.
    pub unlimited: bool,

    /// The daily text count after this session, when the tier is capped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_text_count: Option<u32>,
}

/// Prices usage and moves credits. All balance mutations delegate to the
/// store's compound operations; the ledger never read-modify-writes a
/// balance itself.
pub struct CreditLedger {
    store: Arc<dyn Store>,
    calculator: CreditCalculator,
    policies: TierPolicyTable,
}

impl CreditLedger {
    /// Create a ledger over a store with the given pricing and tier policy.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: PricingRegistry, policies: TierPolicyTable) -> Self {
        Self {
            store,
            calculator: CreditCalculator::new(registry),
            policies,
        }
    }

    /// The calculator this ledger prices with.
    #[must_use]
    pub fn calculator(&self) -> &CreditCalculator {
        &self.calculator
    }

    /// Fetch a subscription, or create one on the given tier with its
    /// monthly allowance if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn ensure_subscription(
        &self,
        user_id: UserId,
        tier: SubscriptionTier,
    ) -> Result<Subscription> {
        if let Some(existing) = self.store.get_subscription(&user_id)? {
            return Ok(existing);
        }
        let subscription = Subscription::new(user_id, tier);
        self.store.put_subscription(&subscription)?;
        info!(user_id = %user_id, tier = tier.as_str(), "subscription created");
        Ok(subscription)
    }

    /// Fetch a subscription that must exist.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` if no record exists.
    pub fn subscription(&self, user_id: &UserId) -> Result<Subscription> {
        self.store
            .get_subscription(user_id)?
            .ok_or(BillingError::SubscriptionNotFound(*user_id))
    }

    /// Price a session without touching any balance.
    #[must_use]
    pub fn preview(&self, events: &[UsageEvent]) -> UsageCharge {
        self.calculator.aggregate(events)
    }

    /// Pre-flight check: could the user afford `estimated_units` of `kind`
    /// right now?
    ///
    /// Units are kind-specific: tokens for text chat, seconds for
    /// transcription and realtime voice, characters for synthesis. The
    /// estimate prices against the kind's reference model.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub fn check_credits(
        &self,
        user_id: &UserId,
        kind: UsageKind,
        estimated_units: u64,
    ) -> Result<CreditCheck> {
        let subscription = self.subscription(user_id)?;
        let policy = self.policies.for_tier(subscription.tier);

        if policy.is_unlimited(kind) {
            if kind == UsageKind::TextChat {
                if let Some(limit) = policy.daily_text_messages {
                    let used = subscription.daily_text_count_on(Utc::now().date_naive());
                    if used >= limit {
                        return Ok(CreditCheck {
                            allowed: false,
                            unlimited: true,
                            credits_required: 0,
                            credits_available: subscription.credits_remaining,
                            reason: Some(DenialReason::DailyLimitReached),
                        });
                    }
                }
            }
            return Ok(CreditCheck {
                allowed: true,
                unlimited: true,
                credits_required: 0,
                credits_available: subscription.credits_remaining,
                reason: None,
            });
        }

        let estimate = self.estimate_event(kind, estimated_units);
        let required = self.calculator.calculate(&estimate).result.credits;
        let allowed = subscription.credits_remaining >= required;

        Ok(CreditCheck {
            allowed,
            unlimited: false,
            credits_required: required,
            credits_available: subscription.credits_remaining,
            reason: if allowed {
                None
            } else {
                Some(DenialReason::InsufficientCredits)
            },
        })
    }

    /// Price a finished session and deduct it from the user's balance.
    ///
    /// When every event in the session falls under an unlimited tier policy
    /// and `force` is false, no credits move; a zero-amount transaction is
    /// still appended so the session shows up in the history, and capped
    /// tiers have their daily text counter advanced and enforced.
    ///
    /// With `force` the session is always charged, clamping the balance at
    /// zero (used when usage must be recorded after the fact).
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if no record exists.
    /// - `DailyLimitExceeded` when the capped text allowance is spent.
    /// - `InsufficientCredits` when the balance cannot cover the charge.
    pub fn deduct_usage(
        &self,
        user_id: &UserId,
        events: &[UsageEvent],
        reference_id: &str,
        source: &str,
        description: &str,
        force: bool,
    ) -> Result<UsageReceipt> {
        let subscription = self.subscription(user_id)?;
        let policy = self.policies.for_tier(subscription.tier);

        let charge = self.calculator.aggregate(events);
        for diagnostic in &charge.diagnostics {
            warn!(user_id = %user_id, ?diagnostic, "usage priced with diagnostic");
        }

        let unlimited = !force && self.session_is_unlimited(events, &policy);

        if unlimited {
            let mut daily_text_count = None;
            if let Some(limit) = policy.daily_text_messages {
                let text_events = self.count_text_events(events);
                if text_events > 0 {
                    // The cap decision lives in the store: the bump is a
                    // single conditional mutation, so racing sessions
                    // cannot both take the last slot.
                    let today = Utc::now().date_naive();
                    let count = self.store.bump_daily_text_count(
                        user_id,
                        today,
                        text_events,
                        Some(limit),
                    )?;
                    daily_text_count = Some(count);
                }
            }

            let transaction =
                CreditTransaction::charge(*user_id, 0, reference_id, source, description);
            let balance_after = self.store.charge_credits(&transaction, false)?;
            let mut transaction = transaction;
            transaction.balance_after = balance_after;

            info!(
                user_id = %user_id,
                reference_id,
                "unlimited usage recorded"
            );
            return Ok(UsageReceipt {
                transaction,
                charge,
                balance_after,
                unlimited: true,
                daily_text_count,
            });
        }

        let transaction = CreditTransaction::charge(
            *user_id,
            charge.result.credits,
            reference_id,
            source,
            description,
        );
        let balance_after = self.store.charge_credits(&transaction, force)?;
        let mut transaction = transaction;
        transaction.balance_after = balance_after;

        info!(
            user_id = %user_id,
            credits = charge.result.credits,
            balance_after,
            reference_id,
            "usage charged"
        );
        Ok(UsageReceipt {
            transaction,
            charge,
            balance_after,
            unlimited: false,
            daily_text_count: None,
        })
    }

    /// Grant bonus credits (voucher rewards, goodwill, refunds go through
    /// `CreditTransaction::refund` with the same path).
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub fn grant_bonus(
        &self,
        user_id: &UserId,
        credits: i64,
        reference_id: &str,
        description: &str,
    ) -> Result<CreditTransaction> {
        // Surface the missing-subscription case with the typed error.
        self.subscription(user_id)?;

        let transaction =
            CreditTransaction::bonus(*user_id, credits, reference_id, "grant", description);
        let balance_after = self.store.add_credits(&transaction)?;
        let mut transaction = transaction;
        transaction.balance_after = balance_after;

        info!(user_id = %user_id, credits, balance_after, "bonus granted");
        Ok(transaction)
    }

    /// The user's transaction history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        Ok(self.store.list_transactions_by_user(user_id, limit, offset)?)
    }

    /// A session is unlimited only when every event resolves to a kind the
    /// policy marks unlimited. Unknown models and mixed metered sessions
    /// charge normally.
    fn session_is_unlimited(&self, events: &[UsageEvent], policy: &TierPolicy) -> bool {
        !events.is_empty()
            && events.iter().all(|event| {
                self.calculator
                    .registry()
                    .kind_of(&event.model)
                    .is_some_and(|kind| policy.is_unlimited(kind))
            })
    }

    fn count_text_events(&self, events: &[UsageEvent]) -> u32 {
        let count = events
            .iter()
            .filter(|event| {
                self.calculator.registry().kind_of(&event.model) == Some(UsageKind::TextChat)
            })
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Build a synthetic event for a pre-flight estimate against the kind's
    /// reference model.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn estimate_event(&self, kind: UsageKind, units: u64) -> UsageEvent {
        let model = PricingRegistry::reference_model(kind);
        match kind {
            // Split unknown ahead of time; price everything at the dearer
            // output rate.
            UsageKind::TextChat => UsageEvent::text(model, 0, units),
            UsageKind::Transcription => UsageEvent::transcription(model, units as f64),
            UsageKind::Synthesis => UsageEvent {
                character_count: Some(units),
                ..UsageEvent::empty(model)
            },
            UsageKind::RealtimeVoice => {
                let tokens_per_second = match self.calculator.registry().rule(model) {
                    Some(PricingRule::RealtimeMixed {
                        audio_tokens_per_second,
                        ..
                    }) => *audio_tokens_per_second,
                    _ => 10.0,
                };
                let tokens = (units as f64 * tokens_per_second) as u64;
                UsageEvent {
                    audio_input_tokens: Some(tokens),
                    audio_output_tokens: Some(tokens),
                    ..UsageEvent::empty(model)
                }
            }
        }
    }
}
