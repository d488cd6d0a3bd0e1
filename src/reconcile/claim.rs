use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::core::error::ClaimErrorKind;
use crate::providers::canonical_vendor_slug;
use crate::reconcile::legacy::{self, LegacyOrder};
use crate::storage::{ClaimKey, InsertOutcome, LegacyRow, OrderStore, OriginTable};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClaimResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_canonical_id: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ClaimErrorKind>,
}

impl ClaimResult {
    fn claimed(id: i64) -> Self {
        Self {
            success: true,
            new_canonical_id: Some(id),
            message: format!("claimed as canonical order {id}"),
            error_kind: None,
        }
    }

    fn already_claimed() -> Self {
        Self {
            success: false,
            new_canonical_id: None,
            message: ClaimErrorKind::AlreadyClaimed.as_str().to_string(),
            error_kind: Some(ClaimErrorKind::AlreadyClaimed),
        }
    }

    fn failed(kind: ClaimErrorKind, reason: impl AsRef<str>) -> Self {
        Self {
            success: false,
            new_canonical_id: None,
            message: format!("{}: {}", kind.as_str(), reason.as_ref()),
            error_kind: Some(kind),
        }
    }

    pub fn is_already_claimed(&self) -> bool {
        self.error_kind == Some(ClaimErrorKind::AlreadyClaimed)
    }
}

/// Which legacy rows a batch claim walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimScope {
    All,
    Vendor(String),
}

impl ClaimScope {
    /// `"all"` (or blank) selects every vendor; anything else is a vendor name or alias.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            ClaimScope::All
        } else {
            ClaimScope::Vendor(trimmed.to_string())
        }
    }

    fn matches(&self, legacy: &LegacyOrder) -> bool {
        match self {
            ClaimScope::All => true,
            ClaimScope::Vendor(raw) => {
                let wanted = canonical_vendor_slug(raw)
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.to_ascii_lowercase());
                legacy.vendor_label().as_deref() == Some(wanted.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClaimFailure {
    pub origin_table: OriginTable,
    pub origin_id: i64,
    pub kind: ClaimErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchClaimResult {
    pub claimed_count: usize,
    pub failed_count: usize,
    /// Rows claimed concurrently by someone else while the batch ran.
    pub skipped_count: usize,
    pub total_count: usize,
    pub errors: Vec<ClaimFailure>,
}

/// Promotes legacy order rows into the canonical store, at most once per row.
/// Legacy tables are only ever read.
pub struct ClaimEngine {
    store: Arc<dyn OrderStore>,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub fn claim(&self, origin_table: OriginTable, origin_id: i64) -> ClaimResult {
        if !origin_table.is_legacy() {
            return ClaimResult::failed(
                ClaimErrorKind::Malformed,
                "canonical orders cannot be claimed",
            );
        }
        let key = ClaimKey::new(origin_table, origin_id);

        match self.store.find_claim(key) {
            Ok(Some(existing)) => {
                debug!("[claim] {key} already claimed by canonical order {existing}");
                return ClaimResult::already_claimed();
            }
            Ok(None) => {}
            Err(err) => {
                warn!("[claim] failed to check claim state for {key}: {err:#}");
                return ClaimResult::failed(ClaimErrorKind::Storage, format!("{err:#}"));
            }
        }

        let row = match self.store.legacy_row(key) {
            Ok(Some(row)) => row,
            Ok(None) => {
                return ClaimResult::failed(ClaimErrorKind::NotFound, format!("{key} does not exist"));
            }
            Err(err) => {
                warn!("[claim] failed to read {key}: {err:#}");
                return ClaimResult::failed(ClaimErrorKind::Storage, format!("{err:#}"));
            }
        };

        self.promote(&row)
    }

    /// Claims every unclaimed legacy row in scope. Per-row failures are tallied,
    /// only a failure to scan the tables themselves is returned as `Err`.
    pub fn claim_batch(&self, scope: &ClaimScope) -> Result<BatchClaimResult> {
        let claimed = self.store.claimed_keys()?;
        let mut result = BatchClaimResult::default();

        for table in OriginTable::LEGACY {
            for row in self.store.legacy_rows(table)? {
                if claimed.contains(&row.key) {
                    continue;
                }
                if !scope.matches(&legacy::extract(&row)) {
                    continue;
                }
                result.total_count += 1;

                let outcome = self.promote(&row);
                if outcome.success {
                    result.claimed_count += 1;
                } else if outcome.is_already_claimed() {
                    result.skipped_count += 1;
                } else {
                    result.failed_count += 1;
                    result.errors.push(ClaimFailure {
                        origin_table: row.key.origin_table,
                        origin_id: row.key.origin_id,
                        kind: outcome.error_kind.unwrap_or(ClaimErrorKind::Storage),
                        message: outcome.message,
                    });
                }
            }
        }

        info!(
            "[claim] batch {:?}: {} claimed, {} failed, {} skipped of {}",
            scope, result.claimed_count, result.failed_count, result.skipped_count, result.total_count
        );
        Ok(result)
    }

    fn promote(&self, row: &LegacyRow) -> ClaimResult {
        let legacy = legacy::extract(row);
        let order = match legacy.to_canonical() {
            Ok(order) => order,
            Err(reason) => {
                warn!("[claim] {} is malformed: {reason}", row.key);
                return ClaimResult::failed(ClaimErrorKind::Malformed, reason);
            }
        };

        match self.store.insert_canonical(&order) {
            Ok(InsertOutcome::Inserted(id)) => {
                info!("[claim] {} promoted to canonical order {id}", row.key);
                ClaimResult::claimed(id)
            }
            Ok(InsertOutcome::ClaimConflict) => {
                debug!("[claim] {} claimed concurrently", row.key);
                ClaimResult::already_claimed()
            }
            Err(err) => {
                warn!("[claim] failed to insert canonical row for {}: {err:#}", row.key);
                ClaimResult::failed(ClaimErrorKind::Storage, format!("{err:#}"))
            }
        }
    }
}
