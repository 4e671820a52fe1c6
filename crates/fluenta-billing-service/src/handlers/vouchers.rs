//! Voucher handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fluenta_billing_core::{
    DiscountResult, RedemptionId, SubscriptionTier, UserId, Voucher, VoucherRedemption,
    VoucherType,
};
use fluenta_billing_engine::{RedemptionContext, RedemptionOutcome};

use crate::error::ApiError;
use crate::state::AppState;

/// Voucher creation request (admin surface).
#[derive(Debug, Deserialize)]
pub struct CreateVoucherRequest {
    /// The code users will type.
    pub code: String,
    /// What the voucher grants.
    pub voucher_type: VoucherType,
    /// Meaning depends on `voucher_type`.
    pub value: i64,
    /// Global redemption cap.
    #[serde(default)]
    pub max_uses: Option<u32>,
    /// Per-user redemption allowance (default 1).
    #[serde(default)]
    pub uses_per_user: Option<u32>,
    /// When the voucher becomes valid (default: now).
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Last valid day, inclusive.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Tiers the voucher applies to (empty: all).
    #[serde(default)]
    pub applicable_tiers: Vec<SubscriptionTier>,
    /// Subscription durations the voucher is limited to.
    #[serde(default)]
    pub allowed_durations_months: Option<Vec<u32>>,
    /// Only redeemable by users with no history.
    #[serde(default)]
    pub new_users_only: bool,
    /// Whether this voucher may combine with others.
    #[serde(default = "default_true")]
    pub is_stackable: bool,
    /// Whether this voucher excludes other exclusive ones.
    #[serde(default)]
    pub is_exclusive: bool,
}

fn default_true() -> bool {
    true
}

/// Create a voucher.
pub async fn create_voucher(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateVoucherRequest>,
) -> Result<Json<Voucher>, ApiError> {
    if body.value <= 0 {
        return Err(ApiError::BadRequest("value must be positive".into()));
    }
    if body.voucher_type == VoucherType::Percentage && body.value > 100 {
        return Err(ApiError::BadRequest(
            "percentage value must be at most 100".into(),
        ));
    }

    let mut voucher = Voucher::new(&body.code, body.voucher_type, body.value);
    voucher.max_uses = body.max_uses;
    if let Some(uses) = body.uses_per_user {
        voucher.uses_per_user = uses;
    }
    if let Some(start) = body.start_date {
        voucher.start_date = start;
    }
    voucher.end_date = body.end_date;
    voucher.applicable_tiers = body.applicable_tiers;
    voucher.allowed_durations_months = body.allowed_durations_months;
    voucher.new_users_only = body.new_users_only;
    voucher.is_stackable = body.is_stackable;
    voucher.is_exclusive = body.is_exclusive;

    state.store.put_voucher(&voucher)?;
    tracing::info!(code = %voucher.code, "voucher created");
    Ok(Json(voucher))
}

/// Voucher validation request.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// The code to validate.
    pub code: String,
    /// The user validating it.
    pub user_id: UserId,
    /// Checkout details.
    #[serde(flatten)]
    pub context: RedemptionContext,
}

/// Voucher validation response.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// Always true; failures come back as errors.
    pub valid: bool,
    /// The normalized code.
    pub code: String,
    /// What the voucher grants.
    pub voucher_type: VoucherType,
    /// The discount the voucher would yield.
    pub discount: DiscountResult,
}

/// Validate a code without redeeming it.
pub async fn validate_voucher(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let (voucher, discount) = state
        .vouchers
        .validate(&body.code, &body.user_id, &body.context)?;
    Ok(Json(ValidateResponse {
        valid: true,
        code: voucher.code,
        voucher_type: voucher.voucher_type,
        discount,
    }))
}

/// Redemption request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// The code to redeem.
    pub code: String,
    /// The redeeming user.
    pub user_id: UserId,
    /// Checkout details.
    #[serde(flatten)]
    pub context: RedemptionContext,
}

/// Redeem a code.
pub async fn redeem_voucher(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedemptionOutcome>, ApiError> {
    let outcome = state
        .vouchers
        .apply(&body.code, &body.user_id, &body.context)?;
    Ok(Json(outcome))
}

/// Revocation request.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    /// The redemption to revoke.
    pub redemption_id: RedemptionId,
}

/// Revoke a redemption.
pub async fn revoke_redemption(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<VoucherRedemption>, ApiError> {
    let revoked = state.vouchers.revoke(&body.redemption_id)?;
    Ok(Json(revoked))
}

/// Stacking check request.
#[derive(Debug, Deserialize)]
pub struct StackableRequest {
    /// The codes a checkout wants to combine.
    pub codes: Vec<String>,
}

/// Stacking check response.
#[derive(Debug, Serialize)]
pub struct StackableResponse {
    /// Always true; conflicts come back as errors naming the code.
    pub stackable: bool,
}

/// Check whether codes may be combined in one transaction.
pub async fn check_stackable(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StackableRequest>,
) -> Result<Json<StackableResponse>, ApiError> {
    let codes: Vec<&str> = body.codes.iter().map(String::as_str).collect();
    state.vouchers.can_stack(&codes)?;
    Ok(Json(StackableResponse { stackable: true }))
}

/// List a user's redemptions, oldest first.
pub async fn list_redemptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<VoucherRedemption>>, ApiError> {
    Ok(Json(state.vouchers.redemptions(&user_id)?))
}
