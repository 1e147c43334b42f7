//! AeonPay Backend Library
//!
//! Campus group-payments engine: plans, vouchers and mandates, the
//! intent/confirm payment flow, a double-entry ledger, and daily
//! reconciliation. Exposed as a library so binaries and integration
//! tests share one crate.

pub mod api;
pub mod clock;
pub mod db;
pub mod directory;
pub mod error;
pub mod idempotency;
pub mod instruments;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod money;
pub mod payments;
pub mod plans;
pub mod recon;
pub mod seed;
