//! Billing engine for Fluenta.
//!
//! Two collaborators over a shared [`fluenta_billing_store::Store`]:
//!
//! - [`CreditLedger`] prices usage events, enforces tier policies (unlimited
//!   kinds, the free-tier daily text cap), and deducts or grants credits.
//! - [`VoucherEngine`] validates promotional codes against the ordered rule
//!   list and applies them transactionally.
//!
//! Neither holds mutable state of its own; all contended mutations go
//! through the store's compound operations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ledger;
pub mod vouchers;

pub use error::BillingError;
pub use ledger::{CreditCheck, CreditLedger, DenialReason, UsageReceipt};
pub use vouchers::{RedemptionContext, RedemptionOutcome, VoucherEngine};
