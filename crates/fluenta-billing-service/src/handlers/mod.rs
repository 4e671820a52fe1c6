//! HTTP request handlers.

pub mod credits;
pub mod health;
pub mod subscriptions;
pub mod usage;
pub mod vouchers;
