//! HTTP API for Fluenta billing.
//!
//! Thin handlers over the engine crate: subscriptions, usage deduction,
//! credit history, and voucher redemption. Authentication is handled by the
//! platform gateway in front of this service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
