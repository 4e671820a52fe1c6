//! Subscription handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fluenta_billing_core::{Subscription, SubscriptionTier, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Create-subscription request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// The user to subscribe.
    pub user_id: UserId,
    /// The plan level.
    pub tier: SubscriptionTier,
}

/// Subscription as returned by the API.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// The subscribed user.
    pub user_id: UserId,
    /// Current plan level.
    pub tier: SubscriptionTier,
    /// Credits left in the current period.
    pub credits_remaining: i64,
    /// Credits granted for the current period.
    pub credits_total: i64,
    /// Text messages sent today.
    pub daily_text_count: u32,
    /// Trial end date, when on a trial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        let today = Utc::now().date_naive();
        Self {
            user_id: sub.user_id,
            tier: sub.tier,
            credits_remaining: sub.credits_remaining,
            credits_total: sub.credits_total,
            daily_text_count: sub.daily_text_count_on(today),
            trial_ends_at: sub.trial_ends_at,
        }
    }
}

/// Create a subscription, or return the existing one unchanged.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.ledger.ensure_subscription(body.user_id, body.tier)?;
    Ok(Json(subscription.into()))
}

/// Get a subscription by user id.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = state.ledger.subscription(&user_id)?;
    Ok(Json(subscription.into()))
}
