//! Application state.

use std::sync::Arc;

use fluenta_billing_engine::{CreditLedger, VoucherEngine};
use fluenta_billing_store::Store;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend (also reachable through the engines; handlers
    /// that only read go straight to it).
    pub store: Arc<dyn Store>,

    /// Pricing, tier policy, and deduction.
    pub ledger: Arc<CreditLedger>,

    /// Voucher validation and redemption.
    pub vouchers: Arc<VoucherEngine>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let ledger = Arc::new(CreditLedger::new(
            store.clone(),
            config.pricing.clone(),
            config.policies.clone(),
        ));
        let vouchers = Arc::new(VoucherEngine::new(store.clone()));

        Self {
            store,
            ledger,
            vouchers,
            config,
        }
    }
}
