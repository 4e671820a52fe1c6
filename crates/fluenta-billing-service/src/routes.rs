//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, health, subscriptions, usage, vouchers};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Subscriptions
/// - `POST /v1/subscriptions` - Create (or fetch) a subscription
/// - `GET /v1/subscriptions/:user_id` - Get a subscription
///
/// ## Credits
/// - `GET /v1/credits/:user_id/transactions` - List transaction history
/// - `POST /v1/credits/grant` - Grant bonus credits
///
/// ## Usage
/// - `POST /v1/usage` - Deduct a finished session
/// - `POST /v1/usage/check` - Pre-flight balance check
/// - `POST /v1/usage/preview` - Price events without charging
///
/// ## Vouchers
/// - `POST /v1/vouchers` - Create a voucher (admin)
/// - `POST /v1/vouchers/validate` - Validate a code
/// - `POST /v1/vouchers/redeem` - Redeem a code
/// - `POST /v1/vouchers/revoke` - Revoke a redemption
/// - `POST /v1/vouchers/stackable` - Check a code combination
/// - `GET /v1/vouchers/redemptions/:user_id` - Redemption history
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Subscriptions
        .route("/v1/subscriptions", post(subscriptions::create_subscription))
        .route(
            "/v1/subscriptions/:user_id",
            get(subscriptions::get_subscription),
        )
        // Credits
        .route(
            "/v1/credits/:user_id/transactions",
            get(credits::list_transactions),
        )
        .route("/v1/credits/grant", post(credits::grant_credits))
        // Usage
        .route("/v1/usage", post(usage::deduct_usage))
        .route("/v1/usage/check", post(usage::check_credits))
        .route("/v1/usage/preview", post(usage::preview_usage))
        // Vouchers
        .route("/v1/vouchers", post(vouchers::create_voucher))
        .route("/v1/vouchers/validate", post(vouchers::validate_voucher))
        .route("/v1/vouchers/redeem", post(vouchers::redeem_voucher))
        .route("/v1/vouchers/revoke", post(vouchers::revoke_redemption))
        .route("/v1/vouchers/stackable", post(vouchers::check_stackable))
        .route(
            "/v1/vouchers/redemptions/:user_id",
            get(vouchers::list_redemptions),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
