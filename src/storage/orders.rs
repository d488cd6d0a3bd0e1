use std::collections::HashSet;
use std::fmt;
use std::sync::MutexGuard;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::normalize::status::OrderStatus;
use crate::storage::db::Db;

/// Physical source of an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginTable {
    Canonical,
    LegacyA,
    LegacyB,
}

impl OriginTable {
    pub const LEGACY: [OriginTable; 2] = [OriginTable::LegacyA, OriginTable::LegacyB];

    pub fn as_str(&self) -> &'static str {
        match self {
            OriginTable::Canonical => "canonical",
            OriginTable::LegacyA => "legacy_a",
            OriginTable::LegacyB => "legacy_b",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "canonical" | "orders" => Some(OriginTable::Canonical),
            "legacy_a" | "legacya" | "legacy_a_orders" => Some(OriginTable::LegacyA),
            "legacy_b" | "legacyb" | "legacy_b_orders" => Some(OriginTable::LegacyB),
            _ => None,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            OriginTable::Canonical => "orders",
            OriginTable::LegacyA => "legacy_a_orders",
            OriginTable::LegacyB => "legacy_b_orders",
        }
    }

    pub fn is_legacy(&self) -> bool {
        !matches!(self, OriginTable::Canonical)
    }
}

impl fmt::Display for OriginTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(origin table, origin row id)`: identity of a legacy row for claim dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    pub origin_table: OriginTable,
    pub origin_id: i64,
}

impl ClaimKey {
    pub fn new(origin_table: OriginTable, origin_id: i64) -> Self {
        Self {
            origin_table,
            origin_id,
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin_table, self.origin_id)
    }
}

/// A legacy row as column name to JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRow {
    pub key: ClaimKey,
    pub columns: Map<String, Value>,
}

impl LegacyRow {
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.get(name).filter(|value| !value.is_null())
    }
}

/// Uniform order shape across canonical and legacy sources.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub origin_table: OriginTable,
    pub remote_id: Option<String>,
    pub vendor_slug: Option<String>,
    pub domain: Option<String>,
    pub status: OrderStatus,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub vendor_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_from: Option<ClaimKey>,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCanonicalOrder {
    pub vendor_slug: String,
    pub remote_id: Option<String>,
    pub domain: String,
    pub status: OrderStatus,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub vendor_payload: Value,
    pub claimed_from: Option<ClaimKey>,
    /// Original creation time of a claimed row. `None` stamps the insert time.
    pub created_at: Option<NaiveDateTime>,
}

/// Fields a status refresh may touch. The claim back-reference is not among them.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStateUpdate {
    pub status: OrderStatus,
    pub domain: Option<String>,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub vendor_payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Another canonical row already carries the same claim key.
    ClaimConflict,
}

/// Row-shaped access to the canonical and legacy order tables.
pub trait OrderStore: Send + Sync {
    fn legacy_row(&self, key: ClaimKey) -> Result<Option<LegacyRow>>;
    fn legacy_rows(&self, table: OriginTable) -> Result<Vec<LegacyRow>>;
    fn claimed_keys(&self) -> Result<HashSet<ClaimKey>>;
    fn find_claim(&self, key: ClaimKey) -> Result<Option<i64>>;
    fn insert_canonical(&self, order: &NewCanonicalOrder) -> Result<InsertOutcome>;
    fn canonical_order(&self, id: i64) -> Result<Option<Order>>;
    fn canonical_orders(&self) -> Result<Vec<Order>>;
    fn find_by_remote(&self, vendor_slug: &str, remote_id: &str) -> Result<Option<Order>>;
    fn update_remote_state(&self, id: i64, update: &RemoteStateUpdate) -> Result<bool>;
}

const CANONICAL_COLUMNS: &str = "id, vendor_slug, remote_id, domain, status, begin_date, end_date, \
     vendor_payload, claim_origin_table, claim_origin_id, created_at";

#[derive(Clone)]
pub struct SqliteOrderStore {
    db: Db,
}

impl SqliteOrderStore {
    pub fn initialize(db: Db) -> Result<Self> {
        Ok(Self { db })
    }

    fn get_with_conn(conn: &Connection, id: i64) -> Result<Option<Order>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CANONICAL_COLUMNS} FROM orders WHERE id = ?1"
        ))?;
        let order = stmt.query_row(params![id], Self::row_to_order).optional()?;
        Ok(order)
    }

    fn row_to_order(row: &Row<'_>) -> rusqlite::Result<Order> {
        let status: String = row.get(4)?;
        let begin_date: Option<String> = row.get(5)?;
        let end_date: Option<String> = row.get(6)?;
        let payload: String = row.get(7)?;
        let origin_table: Option<String> = row.get(8)?;
        let origin_id: Option<i64> = row.get(9)?;
        let created_at: String = row.get(10)?;

        let claimed_from = match (origin_table.as_deref().and_then(OriginTable::parse), origin_id) {
            (Some(table), Some(id)) => Some(ClaimKey::new(table, id)),
            _ => None,
        };

        Ok(Order {
            id: row.get(0)?,
            origin_table: OriginTable::Canonical,
            vendor_slug: Some(row.get(1)?),
            remote_id: row.get(2)?,
            domain: Some(row.get(3)?),
            status: OrderStatus::from_key(&status),
            begin_date: begin_date.as_deref().and_then(parse_stored_date),
            end_date: end_date.as_deref().and_then(parse_stored_date),
            vendor_payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            claimed_from,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).naive_utc()),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock_conn()
            .map_err(|err| anyhow!("orders db mutex poisoned: {err}"))
    }
}

impl OrderStore for SqliteOrderStore {
    fn legacy_row(&self, key: ClaimKey) -> Result<Option<LegacyRow>> {
        if !key.origin_table.is_legacy() {
            return Err(anyhow!("{} is not a legacy table", key.origin_table));
        }
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE id = ?1",
            key.origin_table.table_name()
        ))?;
        let names = column_names(&stmt);
        let columns = stmt
            .query_row(params![key.origin_id], |row| row_to_map(row, &names))
            .optional()
            .with_context(|| format!("failed to read legacy row {key}"))?;
        Ok(columns.map(|columns| LegacyRow { key, columns }))
    }

    fn legacy_rows(&self, table: OriginTable) -> Result<Vec<LegacyRow>> {
        if !table.is_legacy() {
            return Err(anyhow!("{table} is not a legacy table"));
        }
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY id", table.table_name()))?;
        let names = column_names(&stmt);
        let id_index = names.iter().position(|name| name == "id");
        let rows = stmt.query_map([], |row| {
            let id: i64 = match id_index {
                Some(index) => row.get(index)?,
                None => 0,
            };
            Ok(LegacyRow {
                key: ClaimKey::new(table, id),
                columns: row_to_map(row, &names)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to scan {}", table.table_name()))
    }

    fn claimed_keys(&self) -> Result<HashSet<ClaimKey>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT claim_origin_table, claim_origin_id
            FROM orders
            WHERE claim_origin_table IS NOT NULL AND claim_origin_id IS NOT NULL
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let table: String = row.get(0)?;
            let id: i64 = row.get(1)?;
            Ok((table, id))
        })?;

        let mut keys = HashSet::new();
        for row in rows {
            let (table, id) = row?;
            if let Some(table) = OriginTable::parse(&table) {
                keys.insert(ClaimKey::new(table, id));
            }
        }
        Ok(keys)
    }

    fn find_claim(&self, key: ClaimKey) -> Result<Option<i64>> {
        let conn = self.lock_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM orders WHERE claim_origin_table = ?1 AND claim_origin_id = ?2",
                params![key.origin_table.as_str(), key.origin_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_canonical(&self, order: &NewCanonicalOrder) -> Result<InsertOutcome> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339();
        let created_at = order
            .created_at
            .map(|created| created.and_utc().to_rfc3339())
            .unwrap_or_else(|| now.clone());
        let payload = serde_json::to_string(&order.vendor_payload)?;
        let inserted = conn.execute(
            r#"
            INSERT INTO orders (
                vendor_slug, remote_id, domain, status, begin_date, end_date,
                vendor_payload, claim_origin_table, claim_origin_id, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                order.vendor_slug,
                order.remote_id,
                order.domain,
                order.status.as_key(),
                order.begin_date.map(format_stored_date),
                order.end_date.map(format_stored_date),
                payload,
                order.claimed_from.map(|key| key.origin_table.as_str()),
                order.claimed_from.map(|key| key.origin_id),
                created_at,
                now,
            ],
        );

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
            Err(err) if order.claimed_from.is_some() && is_unique_violation(&err) => {
                Ok(InsertOutcome::ClaimConflict)
            }
            Err(err) => Err(err).context("failed to insert canonical order"),
        }
    }

    fn canonical_order(&self, id: i64) -> Result<Option<Order>> {
        let conn = self.lock_conn()?;
        Self::get_with_conn(&conn, id)
    }

    fn canonical_orders(&self) -> Result<Vec<Order>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {CANONICAL_COLUMNS} FROM orders ORDER BY id"))?;
        let rows = stmt.query_map([], Self::row_to_order)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to scan canonical orders")
    }

    fn find_by_remote(&self, vendor_slug: &str, remote_id: &str) -> Result<Option<Order>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CANONICAL_COLUMNS} FROM orders WHERE vendor_slug = ?1 AND remote_id = ?2 ORDER BY id LIMIT 1"
        ))?;
        let order = stmt
            .query_row(params![vendor_slug, remote_id], Self::row_to_order)
            .optional()?;
        Ok(order)
    }

    fn update_remote_state(&self, id: i64, update: &RemoteStateUpdate) -> Result<bool> {
        let conn = self.lock_conn()?;
        let payload = serde_json::to_string(&update.vendor_payload)?;
        let updated = conn.execute(
            r#"
            UPDATE orders
            SET status = ?2,
                domain = COALESCE(?3, domain),
                begin_date = ?4,
                end_date = ?5,
                vendor_payload = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id,
                update.status.as_key(),
                update.domain,
                update.begin_date.map(format_stored_date),
                update.end_date.map(format_stored_date),
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(updated > 0)
    }
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

fn row_to_map(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(value) => Value::Number(value.into()),
            ValueRef::Real(value) => Number::from_f64(value).map_or(Value::Null, Value::Number),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn format_stored_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_stored_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Result<(Db, SqliteOrderStore)> {
        let db = Db::open_in_memory()?;
        let store = SqliteOrderStore::initialize(db.clone())?;
        Ok((db, store))
    }

    fn claimed(key: ClaimKey) -> NewCanonicalOrder {
        NewCanonicalOrder {
            vendor_slug: "nicsrs".into(),
            remote_id: Some("CERT-1".into()),
            domain: "example.com".into(),
            status: OrderStatus::Issued,
            begin_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            vendor_payload: json!({"source": "test"}),
            claimed_from: Some(key),
            created_at: None,
        }
    }

    #[test]
    fn legacy_rows_come_back_as_json_maps() -> Result<()> {
        let (db, store) = store()?;
        db.lock_conn()?.execute(
            "INSERT INTO legacy_b_orders (id, provider, cert_id, common_name, order_status, valid_until)
             VALUES (42, 'nicsrs', 'CERT-42', 'example.com', 'complete', '0000-00-00')",
            [],
        )?;

        let row = store
            .legacy_row(ClaimKey::new(OriginTable::LegacyB, 42))?
            .ok_or_else(|| anyhow!("expected legacy row"))?;
        assert_eq!(row.column("cert_id"), Some(&json!("CERT-42")));
        assert_eq!(row.column("id"), Some(&json!(42)));
        assert!(row.column("raw_response").is_none());

        assert!(store.legacy_row(ClaimKey::new(OriginTable::LegacyB, 7))?.is_none());
        assert!(store.legacy_row(ClaimKey::new(OriginTable::Canonical, 1)).is_err());
        assert_eq!(store.legacy_rows(OriginTable::LegacyB)?.len(), 1);
        Ok(())
    }

    #[test]
    fn duplicate_claim_key_is_reported_as_conflict() -> Result<()> {
        let (_db, store) = store()?;
        let key = ClaimKey::new(OriginTable::LegacyA, 3);

        let first = store.insert_canonical(&claimed(key))?;
        let InsertOutcome::Inserted(id) = first else {
            return Err(anyhow!("expected insert, got {first:?}"));
        };
        assert_eq!(store.insert_canonical(&claimed(key))?, InsertOutcome::ClaimConflict);
        assert_eq!(store.find_claim(key)?, Some(id));
        assert!(store.claimed_keys()?.contains(&key));

        let order = store
            .canonical_order(id)?
            .ok_or_else(|| anyhow!("expected canonical order"))?;
        assert_eq!(order.claimed_from, Some(key));
        assert_eq!(order.status, OrderStatus::Issued);
        assert_eq!(order.end_date, NaiveDate::from_ymd_opt(2026, 1, 1));
        assert!(order.created_at.is_some());
        Ok(())
    }

    #[test]
    fn claimed_row_keeps_original_creation_time() -> Result<()> {
        let (_db, store) = store()?;
        let created = NaiveDate::from_ymd_opt(2019, 1, 1)
            .and_then(|date| date.and_hms_opt(8, 15, 0))
            .ok_or_else(|| anyhow!("invalid timestamp"))?;
        let order = NewCanonicalOrder {
            created_at: Some(created),
            ..claimed(ClaimKey::new(OriginTable::LegacyB, 11))
        };
        let InsertOutcome::Inserted(id) = store.insert_canonical(&order)? else {
            return Err(anyhow!("expected insert"));
        };
        let stored = store
            .canonical_order(id)?
            .ok_or_else(|| anyhow!("expected canonical order"))?;
        assert_eq!(stored.created_at, Some(created));
        Ok(())
    }

    #[test]
    fn status_refresh_keeps_claim_reference() -> Result<()> {
        let (_db, store) = store()?;
        let key = ClaimKey::new(OriginTable::LegacyB, 9);
        let InsertOutcome::Inserted(id) = store.insert_canonical(&claimed(key))? else {
            return Err(anyhow!("expected insert"));
        };

        let updated = store.update_remote_state(id, &RemoteStateUpdate {
            status: OrderStatus::Revoked,
            domain: None,
            begin_date: None,
            end_date: NaiveDate::from_ymd_opt(2027, 1, 1),
            vendor_payload: json!({"refreshed": true}),
        })?;
        assert!(updated);

        let order = store
            .find_by_remote("nicsrs", "CERT-1")?
            .ok_or_else(|| anyhow!("expected order by remote id"))?;
        assert_eq!(order.id, id);
        assert_eq!(order.status, OrderStatus::Revoked);
        assert_eq!(order.domain.as_deref(), Some("example.com"));
        assert_eq!(order.claimed_from, Some(key));
        assert_eq!(order.vendor_payload, json!({"refreshed": true}));
        Ok(())
    }

    #[test]
    fn origin_table_parses_aliases() {
        assert_eq!(OriginTable::parse("legacyB"), Some(OriginTable::LegacyB));
        assert_eq!(OriginTable::parse("legacy-a"), Some(OriginTable::LegacyA));
        assert_eq!(OriginTable::parse("orders"), Some(OriginTable::Canonical));
        assert_eq!(OriginTable::parse("tblhosting"), None);
    }
}
