//! Usage deduction handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use fluenta_billing_core::{UsageCharge, UsageEvent, UsageKind, UserId};
use fluenta_billing_engine::CreditCheck;

use crate::error::ApiError;
use crate::state::AppState;

/// Usage deduction request: a finished session's events.
#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    /// User being charged.
    pub user_id: UserId,
    /// The session's usage events, in order.
    pub events: Vec<UsageEvent>,
    /// What the charge refers to (session id, message id, ...).
    pub reference_id: String,
    /// Originating pipeline ("chat", "voice_session", ...).
    pub source: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Charge even if the balance cannot cover it (clamps at zero).
    #[serde(default)]
    pub force: bool,
}

/// Usage deduction response.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Credits deducted (zero for unlimited sessions).
    pub credits_charged: i64,
    /// The priced charge, including the breakdown and diagnostics.
    pub charge: UsageCharge,
    /// Balance after the deduction.
    pub balance_after: i64,
    /// Whether the session fell under an unlimited tier policy.
    pub unlimited: bool,
    /// The appended transaction's id.
    pub transaction_id: String,
    /// Daily text count after the session, when the tier is capped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_text_count: Option<u32>,
}

/// Deduct a finished session from the user's balance.
pub async fn deduct_usage(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UsageRequest>,
) -> Result<Json<UsageResponse>, ApiError> {
    if body.events.is_empty() {
        return Err(ApiError::BadRequest("events must not be empty".into()));
    }

    let receipt = state.ledger.deduct_usage(
        &body.user_id,
        &body.events,
        &body.reference_id,
        &body.source,
        &body.description,
        body.force,
    )?;

    Ok(Json(UsageResponse {
        credits_charged: receipt.transaction.amount.abs(),
        balance_after: receipt.balance_after,
        unlimited: receipt.unlimited,
        transaction_id: receipt.transaction.id.to_string(),
        daily_text_count: receipt.daily_text_count,
        charge: receipt.charge,
    }))
}

/// Pre-flight check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// User to check.
    pub user_id: UserId,
    /// The usage kind about to run.
    pub kind: UsageKind,
    /// Estimated units: tokens for text, seconds for transcription and
    /// realtime voice, characters for synthesis.
    pub estimated_units: u64,
}

/// Check whether a user could afford some usage right now.
pub async fn check_credits(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CreditCheck>, ApiError> {
    let check = state
        .ledger
        .check_credits(&body.user_id, body.kind, body.estimated_units)?;
    Ok(Json(check))
}

/// Preview request: price events without charging anyone.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    /// Events to price.
    pub events: Vec<UsageEvent>,
}

/// Price a session without touching any balance.
pub async fn preview_usage(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreviewRequest>,
) -> Json<UsageCharge> {
    Json(state.ledger.preview(&body.events))
}
