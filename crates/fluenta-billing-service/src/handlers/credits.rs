//! Credit transaction handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use fluenta_billing_core::{CreditTransaction, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    /// Maximum records to return.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Records to skip.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction list response.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<CreditTransaction>,
    /// The applied limit.
    pub limit: usize,
    /// The applied offset.
    pub offset: usize,
}

/// List a user's credit transactions, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(page): Query<Pagination>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state
        .ledger
        .list_transactions(&user_id, page.limit, page.offset)?;
    Ok(Json(TransactionsResponse {
        transactions,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Bonus grant request.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// The user to credit.
    pub user_id: UserId,
    /// Credits to grant.
    pub credits: i64,
    /// What the grant refers to (promo id, support ticket, ...).
    pub reference_id: String,
    /// Human-readable description.
    pub description: String,
}

/// Bonus grant response.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// The recorded transaction.
    pub transaction: CreditTransaction,
    /// Balance after the grant.
    pub balance_after: i64,
}

/// Grant bonus credits to a user.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    if body.credits <= 0 {
        return Err(ApiError::BadRequest("credits must be positive".into()));
    }
    let transaction =
        state
            .ledger
            .grant_bonus(&body.user_id, body.credits, &body.reference_id, &body.description)?;
    let balance_after = transaction.balance_after;
    Ok(Json(GrantResponse {
        transaction,
        balance_after,
    }))
}
