//! Converts vendor period/price encodings into month-keyed price tiers.
//!
//! Every vendor ends up in the same place: `PriceTier` keyed by whole months.
//! Prices that are missing, empty, zero, negative or unparseable are treated as
//! "period not offered" and never written.

use std::str::FromStr;

use log::debug;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::catalog::{PriceTable, PriceTier, PriceTierKind};

/// Native unit a vendor uses for a validity period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Years,
    Months,
    /// Years, except multiples of 12 which already count months
    /// (`1` and `12` are both one year).
    YearsOrMonths,
}

impl PeriodUnit {
    pub fn to_months(self, value: u32) -> Option<u32> {
        if value == 0 {
            return None;
        }
        match self {
            PeriodUnit::Years => value.checked_mul(12),
            PeriodUnit::Months => Some(value),
            PeriodUnit::YearsOrMonths if value % 12 == 0 => Some(value),
            PeriodUnit::YearsOrMonths => value.checked_mul(12),
        }
    }
}

/// Parses a vendor price (string or JSON number). Returns `None` for anything
/// that does not represent a positive price.
pub fn parse_price(raw: &Value) -> Option<Decimal> {
    let text = match raw {
        Value::String(value) => value.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    let price = Decimal::from_str(&text.replace(',', "")).ok()?;
    if price.is_sign_negative() || price.is_zero() {
        return None;
    }
    Some(price)
}

/// Parses a period value such as `"2"`, `2` or `"24"`.
pub fn parse_period(raw: &Value) -> Option<u32> {
    match raw {
        Value::Number(number) => number.as_u64().and_then(|value| u32::try_from(value).ok()),
        Value::String(value) => value.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Builds a tier from a `{period: price}` map, e.g. `{"1": "5.99", "2": "10.99"}`.
pub fn tier_from_period_map(map: &Map<String, Value>, unit: PeriodUnit) -> PriceTier {
    let mut tier = PriceTier::new();
    for (key, raw_price) in map {
        let Some(months) = key.trim().parse::<u32>().ok().and_then(|n| unit.to_months(n)) else {
            debug!("[pricing] ignoring non-numeric period key {key:?}");
            continue;
        };
        if let Some(price) = parse_price(raw_price) {
            tier.insert(months, price);
        }
    }
    tier
}

/// Builds a tier from fixed-width suffix codes, e.g. `{"price001": "8.00"}`
/// where the numeric suffix is the period in `unit`.
pub fn tier_from_suffix_codes(map: &Map<String, Value>, prefix: &str, unit: PeriodUnit) -> PriceTier {
    let mut tier = PriceTier::new();
    for (key, raw_price) in map {
        let Some(months) = parse_suffix_code(key, prefix).and_then(|n| unit.to_months(n)) else {
            continue;
        };
        if let Some(price) = parse_price(raw_price) {
            tier.insert(months, price);
        }
    }
    tier
}

/// Extracts the numeric suffix of `prefix` + digits. Non-digit suffixes are rejected.
pub fn parse_suffix_code(code: &str, prefix: &str) -> Option<u32> {
    let suffix = code.trim().strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    suffix.parse::<u32>().ok()
}

/// Builds a tier from explicit `(period, price)` entries.
pub fn tier_from_entries<'a, I>(entries: I, unit: PeriodUnit) -> PriceTier
where
    I: IntoIterator<Item = (&'a Value, &'a Value)>,
{
    let mut tier = PriceTier::new();
    for (raw_period, raw_price) in entries {
        let Some(months) = parse_period(raw_period).and_then(|n| unit.to_months(n)) else {
            continue;
        };
        if let Some(price) = parse_price(raw_price) {
            tier.insert(months, price);
        }
    }
    tier
}

/// Assembles a table from optional per-tier period maps.
pub fn table_from_period_maps(
    base: Option<&Map<String, Value>>,
    san: Option<&Map<String, Value>>,
    wildcard_san: Option<&Map<String, Value>>,
    unit: PeriodUnit,
) -> PriceTable {
    let mut table = PriceTable::default();
    for (kind, map) in [
        (PriceTierKind::Base, base),
        (PriceTierKind::San, san),
        (PriceTierKind::WildcardSan, wildcard_san),
    ] {
        if let Some(map) = map {
            *table.tier_mut(kind) = tier_from_period_map(map, unit);
        }
    }
    table
}
