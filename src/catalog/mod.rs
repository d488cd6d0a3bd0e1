//! Vendor-neutral certificate product model.
//!
//! Adapters build these values fresh on every catalog fetch; nothing in the
//! crate mutates a product after it has been returned to a caller.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValidationType {
    Dv,
    Ov,
    Ev,
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationType::Dv => "dv",
            ValidationType::Ov => "ov",
            ValidationType::Ev => "ev",
        }
    }

    /// Parses vendor vocabulary ("DV", "domain", "business", "extended", ...).
    pub fn from_vendor(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dv" | "domain" | "domain validation" | "domain validated" => Some(ValidationType::Dv),
            "ov" | "organization" | "organisation" | "business" | "organization validated" => {
                Some(ValidationType::Ov)
            }
            "ev" | "extended" | "extended validation" => Some(ValidationType::Ev),
            _ => None,
        }
    }

    /// Falls back to scanning a product name for EV/OV markers.
    pub fn infer_from_name(name: &str) -> Self {
        let lowered = format!(" {} ", name.to_ascii_lowercase());
        if lowered.contains(" ev ") || lowered.contains("extended") {
            ValidationType::Ev
        } else if lowered.contains(" ov ")
            || lowered.contains("organization")
            || lowered.contains("business")
            || lowered.contains("instantssl")
        {
            ValidationType::Ov
        } else {
            ValidationType::Dv
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Ssl,
    Wildcard,
    MultiDomain,
    CodeSigning,
    Email,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Ssl => "ssl",
            ProductType::Wildcard => "wildcard",
            ProductType::MultiDomain => "multi_domain",
            ProductType::CodeSigning => "code_signing",
            ProductType::Email => "email",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ssl" => Some(ProductType::Ssl),
            "wildcard" => Some(ProductType::Wildcard),
            "multi_domain" => Some(ProductType::MultiDomain),
            "code_signing" => Some(ProductType::CodeSigning),
            "email" => Some(ProductType::Email),
            _ => None,
        }
    }

    /// Classifies a product from its name and vendor feature flags.
    pub fn infer(name: &str, supports_wildcard: bool, supports_san: bool) -> Self {
        let lowered = name.to_ascii_lowercase();
        if lowered.contains("code sign") || lowered.contains("codesign") {
            ProductType::CodeSigning
        } else if lowered.contains("s/mime") || lowered.contains("smime") || lowered.contains("email")
        {
            ProductType::Email
        } else if lowered.contains("multi")
            || lowered.contains("ucc")
            || (supports_san && !lowered.contains("wildcard"))
        {
            ProductType::MultiDomain
        } else if supports_wildcard || lowered.contains("wildcard") {
            ProductType::Wildcard
        } else {
            ProductType::Ssl
        }
    }
}

/// Price tier keyed by validity period in months.
pub type PriceTier = BTreeMap<u32, Decimal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTierKind {
    Base,
    San,
    WildcardSan,
}

/// Month-keyed price tables. A missing key means the period is not offered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceTable {
    #[serde(default)]
    pub base: PriceTier,
    #[serde(default)]
    pub san: PriceTier,
    #[serde(default)]
    pub wildcard_san: PriceTier,
}

impl PriceTable {
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn tier(&self, kind: PriceTierKind) -> &PriceTier {
        match kind {
            PriceTierKind::Base => &self.base,
            PriceTierKind::San => &self.san,
            PriceTierKind::WildcardSan => &self.wildcard_san,
        }
    }

    pub fn tier_mut(&mut self, kind: PriceTierKind) -> &mut PriceTier {
        match kind {
            PriceTierKind::Base => &mut self.base,
            PriceTierKind::San => &mut self.san,
            PriceTierKind::WildcardSan => &mut self.wildcard_san,
        }
    }

    /// Records a price; zero months and negative prices are ignored.
    pub fn insert(&mut self, kind: PriceTierKind, months: u32, price: Decimal) -> bool {
        if months == 0 || price.is_sign_negative() {
            return false;
        }
        self.tier_mut(kind).insert(months, price);
        true
    }

    pub fn price(&self, kind: PriceTierKind, months: u32) -> Option<Decimal> {
        self.tier(kind).get(&months).copied()
    }

    pub fn offered_months(&self) -> Vec<u32> {
        self.base.keys().copied().collect()
    }

    pub fn min_years(&self) -> Option<u32> {
        self.base.keys().next().map(|months| months.div_ceil(12))
    }

    pub fn max_years(&self) -> Option<u32> {
        self.base.keys().next_back().map(|months| months.div_ceil(12))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalProduct {
    pub code: String,
    pub name: String,
    pub vendor: String,
    pub validation_type: ValidationType,
    pub product_type: ProductType,
    pub supports_wildcard: bool,
    pub supports_san: bool,
    pub max_domains: u32,
    pub min_years: u32,
    pub max_years: u32,
    pub price_table: PriceTable,
    #[serde(default)]
    pub vendor_extra: Map<String, Value>,
}

impl CanonicalProduct {
    /// Clamps the advertised year range to the periods that actually carry a price.
    pub fn with_observed_periods(mut self) -> Self {
        if let (Some(min), Some(max)) = (self.price_table.min_years(), self.price_table.max_years())
        {
            self.min_years = min;
            self.max_years = max;
        }
        self
    }
}
