//! Provider normalization and order reconciliation for SSL certificate reselling.
//!
//! [`providers::ProviderRegistry`] hides four reseller APIs behind one
//! [`providers::Provider`] contract. [`reconcile::ClaimEngine`] promotes legacy
//! order rows into the canonical store exactly once, and
//! [`reconcile::Aggregator`] reports across all order sources without counting
//! a claimed row twice.

pub mod catalog;
pub mod config;
pub mod core;
pub mod credentials;
pub mod domain;
pub mod logging;
pub mod normalize;
pub mod providers;
pub mod reconcile;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use crate::core::error::{ClaimErrorKind, ErrorCategory, ProviderError};
pub use crate::core::types::OperationResult;
