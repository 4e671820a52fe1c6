//! Core types and pure billing math for Fluenta.
//!
//! This crate provides the foundational types used throughout the Fluenta
//! billing platform:
//!
//! - **Identifiers**: `UserId`, `VoucherId`, `TransactionId`, `RedemptionId`
//! - **Pricing**: `PricingRegistry`, `PricingRule`
//! - **Usage**: `UsageEvent`, `UsageKind`
//! - **Calculation**: `CreditCalculator`, `CreditResult`, `UsageCharge`
//! - **Subscriptions**: `Subscription`, `SubscriptionTier`, `TierPolicyTable`
//! - **Credits**: `CreditTransaction`, `TransactionType`
//! - **Vouchers**: `Voucher`, `VoucherRedemption`, `DiscountResult`
//!
//! # Credit unit
//!
//! **1 credit buys $0.0001 of provider cost.**
//!
//! - gpt-4o-mini turn (800 in / 200 out tokens) costs $0.00024 → 3 credits
//! - one transcribed minute (whisper-1) costs $0.006 → 60 credits
//!
//! Credits are stored as `i64` integers; any positive provider cost charges
//! at least one credit so high-volume small events are never free.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod calculator;
pub mod credits;
pub mod ids;
pub mod pricing;
pub mod subscription;
pub mod usage;
pub mod voucher;

pub use calculator::{breakdown, CreditCalculator, CreditResult, UsageCharge, UsageDiagnostic};
pub use credits::{CreditTransaction, TransactionType};
pub use ids::{IdError, RedemptionId, TransactionId, UserId, VoucherId};
pub use pricing::{PricingRegistry, PricingRule, CREDIT_UNIT_USD};
pub use subscription::{Subscription, SubscriptionTier, TierPolicy, TierPolicyTable};
pub use usage::{UsageEvent, UsageKind};
pub use voucher::{
    compute_discount, end_of_day, normalize_code, DiscountResult, RedemptionStatus, Voucher,
    VoucherEffect, VoucherError, VoucherRedemption, VoucherType,
};
