//! Legacy order reconciliation: one-time claiming of legacy rows into the
//! canonical store and a duplicate-free view across all three order sources.

pub mod aggregate;
pub mod claim;
pub mod legacy;

pub use aggregate::{AggregateReport, Aggregator, OrderFilter, OrderPage};
pub use claim::{BatchClaimResult, ClaimEngine, ClaimFailure, ClaimResult, ClaimScope};
pub use legacy::LegacyOrder;
