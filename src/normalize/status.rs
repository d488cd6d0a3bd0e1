//! Canonical order status and the lookup used to reach it from vendor strings.
//!
//! Normalization is total: any input produces an [`OrderStatus`], with
//! unmapped vendor strings carried as a title-cased [`OrderStatus::Unknown`].

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    AwaitingValidation,
    Issued,
    Revoked,
    Cancelled,
    Expired,
    Rejected,
    /// Vendor status with no canonical mapping, title-cased for display.
    Unknown(String),
}

/// Static vendor vocabulary: lower-cased vendor string to canonical status.
pub type StatusTable = [(&'static str, OrderStatus)];

/// Vocabulary shared by most vendors; consulted after the vendor table.
static GENERIC_STATUSES: &StatusTable = &[
    ("pending", OrderStatus::Pending),
    ("new", OrderStatus::Pending),
    ("incomplete", OrderStatus::Pending),
    ("processing", OrderStatus::Processing),
    ("in progress", OrderStatus::Processing),
    ("awaiting validation", OrderStatus::AwaitingValidation),
    ("awaiting_validation", OrderStatus::AwaitingValidation),
    ("issued", OrderStatus::Issued),
    ("active", OrderStatus::Issued),
    ("complete", OrderStatus::Issued),
    ("completed", OrderStatus::Issued),
    ("revoked", OrderStatus::Revoked),
    ("cancelled", OrderStatus::Cancelled),
    ("canceled", OrderStatus::Cancelled),
    ("expired", OrderStatus::Expired),
    ("rejected", OrderStatus::Rejected),
    ("declined", OrderStatus::Rejected),
];

impl OrderStatus {
    /// Stable storage key.
    pub fn as_key(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::AwaitingValidation => "awaiting_validation",
            OrderStatus::Issued => "issued",
            OrderStatus::Revoked => "revoked",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::AwaitingValidation => "Awaiting Validation",
            OrderStatus::Issued => "Issued",
            OrderStatus::Revoked => "Revoked",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Expired => "Expired",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Unknown(raw) => raw.as_str(),
        }
    }

    /// Inverse of [`OrderStatus::as_key`] for values read back from storage.
    pub fn from_key(key: &str) -> Self {
        match key {
            "pending" => OrderStatus::Pending,
            "processing" => OrderStatus::Processing,
            "awaiting_validation" => OrderStatus::AwaitingValidation,
            "issued" => OrderStatus::Issued,
            "revoked" => OrderStatus::Revoked,
            "cancelled" => OrderStatus::Cancelled,
            "expired" => OrderStatus::Expired,
            "rejected" => OrderStatus::Rejected,
            other => OrderStatus::Unknown(title_case(other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Revoked | OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_key())
    }
}

/// Maps a vendor status string to the canonical enum. Never fails.
pub fn normalize_status(table: &StatusTable, raw: &str) -> OrderStatus {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return OrderStatus::Unknown("Unknown".to_string());
    }
    table
        .iter()
        .chain(GENERIC_STATUSES.iter())
        .find(|(vendor_key, _)| *vendor_key == key)
        .map(|(_, status)| status.clone())
        .unwrap_or_else(|| OrderStatus::Unknown(title_case(&key)))
}

/// `"awaiting_dcv-check"` -> `"Awaiting Dcv Check"`.
pub fn title_case(raw: &str) -> String {
    let words: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "Unknown".to_string()
    } else {
        words.join(" ")
    }
}
