//! Field extraction for the two legacy order tables.
//!
//! `legacy_a_orders` keeps the domain and validity dates inside its
//! `config_data` JSON blob, `legacy_b_orders` has dedicated columns that may
//! hold zero-date sentinels. Both end up in the same [`LegacyOrder`] shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::domain::{first_storable_domain, normalize_domain_for_storage};
use crate::normalize::dates::parse_vendor_date;
use crate::normalize::status::OrderStatus;
use crate::providers::payload::{first_text, text, value_text};
use crate::providers::{canonical_vendor_slug, normalize_vendor_status};
use crate::storage::{ClaimKey, LegacyRow, NewCanonicalOrder, Order, OriginTable};

const LEGACY_A_DOMAIN_KEYS: &[&str] = &["domain", "common_name", "commonName", "domains"];
const LEGACY_A_REMOTE_KEYS: &[&str] = &["remote_id", "remoteid", "order_id", "orderId", "cert_id"];
const LEGACY_A_BEGIN_KEYS: &[&str] = &["valid_from", "begin_date", "validFrom"];
const LEGACY_A_END_KEYS: &[&str] = &["valid_till", "valid_until", "end_date", "expires", "validTill"];
const LEGACY_B_PAYLOAD_DOMAIN_KEYS: &[&str] = &["domain", "common_name", "commonName"];

/// A legacy row translated to canonical vocabulary, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyOrder {
    pub key: ClaimKey,
    /// Raw vendor/module name as stored in the legacy row.
    pub vendor_raw: Option<String>,
    pub remote_id: Option<String>,
    pub domain_raw: Option<String>,
    pub status: OrderStatus,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: Option<NaiveDateTime>,
    pub payload: Value,
}

impl LegacyOrder {
    pub fn vendor_slug(&self) -> Option<&'static str> {
        self.vendor_raw.as_deref().and_then(canonical_vendor_slug)
    }

    /// Vendor label for reporting: the known slug, or the raw module name.
    pub fn vendor_label(&self) -> Option<String> {
        self.vendor_slug()
            .map(str::to_string)
            .or_else(|| self.vendor_raw.as_ref().map(|raw| raw.trim().to_ascii_lowercase()))
    }

    /// Builds the canonical row for a claim. `Err` carries the malformed reason.
    pub fn to_canonical(&self) -> Result<NewCanonicalOrder, String> {
        let vendor_slug = match (&self.vendor_raw, self.vendor_slug()) {
            (None, _) => return Err("missing vendor".to_string()),
            (Some(raw), None) => return Err(format!("unknown vendor module {raw:?}")),
            (Some(_), Some(slug)) => slug,
        };
        let domain_raw = self
            .domain_raw
            .as_deref()
            .ok_or_else(|| "missing domain".to_string())?;
        let domain = first_storable_domain(domain_raw)
            .ok_or_else(|| format!("invalid domain {domain_raw:?}"))?;

        Ok(NewCanonicalOrder {
            vendor_slug: vendor_slug.to_string(),
            remote_id: self.remote_id.clone(),
            domain,
            status: self.status.clone(),
            begin_date: self.begin_date,
            end_date: self.end_date,
            vendor_payload: self.payload.clone(),
            claimed_from: Some(self.key),
            created_at: self.created_at,
        })
    }

    /// Uniform order view. Malformed rows keep whatever fields they have.
    pub fn into_order(self) -> Order {
        let vendor_slug = self.vendor_label();
        let domain = self.domain_raw.as_deref().map(|raw| {
            first_storable_domain(raw)
                .or_else(|| normalize_domain_for_storage(raw).ok())
                .unwrap_or_else(|| raw.trim().to_string())
        });
        Order {
            id: self.key.origin_id,
            origin_table: self.key.origin_table,
            remote_id: self.remote_id,
            vendor_slug,
            domain,
            status: self.status,
            begin_date: self.begin_date,
            end_date: self.end_date,
            vendor_payload: self.payload,
            claimed_from: None,
            created_at: self.created_at,
        }
    }
}

pub fn extract(row: &LegacyRow) -> LegacyOrder {
    match row.key.origin_table {
        OriginTable::LegacyB => extract_legacy_b(row),
        _ => extract_legacy_a(row),
    }
}

fn extract_legacy_a(row: &LegacyRow) -> LegacyOrder {
    let config = json_object(row.column("config_data"));
    let vendor_raw = row.column("module").and_then(value_text);
    let status_raw = row
        .column("status")
        .and_then(value_text)
        .or_else(|| text(&config, "status"))
        .unwrap_or_default();

    LegacyOrder {
        key: row.key,
        status: normalize_vendor_status(vendor_raw.as_deref().unwrap_or_default(), &status_raw),
        vendor_raw,
        remote_id: row
            .column("remote_id")
            .and_then(value_text)
            .or_else(|| first_text(&config, LEGACY_A_REMOTE_KEYS)),
        domain_raw: first_text(&config, LEGACY_A_DOMAIN_KEYS)
            .or_else(|| first_array_text(&config, "domains")),
        begin_date: first_date(&config, LEGACY_A_BEGIN_KEYS),
        end_date: first_date(&config, LEGACY_A_END_KEYS),
        created_at: row.column("created_at").and_then(value_text).and_then(|raw| parse_created(&raw)),
        payload: Value::Object(config),
    }
}

fn extract_legacy_b(row: &LegacyRow) -> LegacyOrder {
    let payload = json_object(row.column("raw_response"));
    let vendor_raw = row.column("provider").and_then(value_text);
    let status_raw = row.column("order_status").and_then(value_text).unwrap_or_default();

    LegacyOrder {
        key: row.key,
        status: normalize_vendor_status(vendor_raw.as_deref().unwrap_or_default(), &status_raw),
        vendor_raw,
        remote_id: row.column("cert_id").and_then(value_text),
        domain_raw: row
            .column("common_name")
            .and_then(value_text)
            .or_else(|| first_text(&payload, LEGACY_B_PAYLOAD_DOMAIN_KEYS)),
        begin_date: row
            .column("valid_from")
            .and_then(value_text)
            .and_then(|raw| parse_vendor_date(&raw)),
        end_date: row
            .column("valid_until")
            .and_then(value_text)
            .and_then(|raw| parse_vendor_date(&raw)),
        created_at: row.column("created_on").and_then(value_text).and_then(|raw| parse_created(&raw)),
        payload: Value::Object(payload),
    }
}

/// Parses a JSON blob column. Anything that is not an object becomes empty.
fn json_object(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

fn first_array_text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)?.as_array()?.iter().find_map(value_text)
}

fn first_date(map: &Map<String, Value>, keys: &[&str]) -> Option<NaiveDate> {
    keys.iter()
        .filter_map(|key| text(map, key))
        .find_map(|raw| parse_vendor_date(&raw))
}

fn parse_created(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed);
    }
    parse_vendor_date(trimmed).and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(table: OriginTable, id: i64, columns: Value) -> LegacyRow {
        let Value::Object(columns) = columns else {
            panic!("columns must be an object");
        };
        LegacyRow {
            key: ClaimKey::new(table, id),
            columns,
        }
    }

    #[test]
    fn legacy_a_reads_domain_and_dates_from_blob() {
        let legacy = extract(&row(
            OriginTable::LegacyA,
            5,
            json!({
                "id": 5,
                "module": "GoGetSSLModule",
                "remote_id": null,
                "status": "active",
                "config_data": r#"{"domain":"Shop.Example.com","order_id":"9911","valid_from":"2025-02-01","valid_till":"2026-02-01 00:00:00"}"#,
                "created_at": "2025-01-30 10:00:00"
            }),
        ));

        assert_eq!(legacy.vendor_slug(), Some("gogetssl"));
        assert_eq!(legacy.remote_id.as_deref(), Some("9911"));
        assert_eq!(legacy.status, OrderStatus::Issued);
        assert_eq!(legacy.end_date, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert!(legacy.created_at.is_some());

        let canonical = legacy.to_canonical().expect("well-formed row");
        assert_eq!(canonical.domain, "shop.example.com");
        assert_eq!(canonical.claimed_from, Some(ClaimKey::new(OriginTable::LegacyA, 5)));
    }

    #[test]
    fn legacy_b_zero_dates_are_absent() {
        let legacy = extract(&row(
            OriginTable::LegacyB,
            42,
            json!({
                "id": 42,
                "provider": "nicsrs",
                "cert_id": "CERT-42",
                "common_name": "example.com",
                "order_status": "complete",
                "valid_from": "0000-00-00",
                "valid_until": "0000-00-00 00:00:00",
                "raw_response": "not json",
                "created_on": "2024-06-01"
            }),
        ));

        assert_eq!(legacy.begin_date, None);
        assert_eq!(legacy.end_date, None);
        assert_eq!(legacy.payload, json!({}));
        assert_eq!(legacy.status, OrderStatus::Issued);
        assert_eq!(legacy.to_canonical().map(|order| order.domain), Ok("example.com".to_string()));
    }

    #[test]
    fn missing_vendor_or_domain_is_malformed() {
        let no_domain = extract(&row(
            OriginTable::LegacyB,
            1,
            json!({"id": 1, "provider": "nicsrs", "order_status": "pending"}),
        ));
        assert_eq!(no_domain.to_canonical(), Err("missing domain".to_string()));

        let no_vendor = extract(&row(
            OriginTable::LegacyA,
            2,
            json!({"id": 2, "config_data": "{\"domain\":\"example.com\"}"}),
        ));
        assert_eq!(no_vendor.to_canonical(), Err("missing vendor".to_string()));

        let unknown = extract(&row(
            OriginTable::LegacyA,
            3,
            json!({"id": 3, "module": "cpanel", "config_data": "{\"domain\":\"example.com\"}"}),
        ));
        assert!(unknown.to_canonical().is_err());

        // The aggregate view still keeps what is there.
        let order = unknown.into_order();
        assert_eq!(order.vendor_slug.as_deref(), Some("cpanel"));
        assert_eq!(order.domain.as_deref(), Some("example.com"));
    }
}
