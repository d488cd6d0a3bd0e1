use std::sync::MutexGuard;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::catalog::{CanonicalProduct, PriceTable, ProductType, ValidationType};
use crate::storage::db::Db;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredProduct {
    pub product: CanonicalProduct,
    pub synced_at: DateTime<Utc>,
}

/// Counts from replacing one vendor's catalog.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CatalogReplaceSummary {
    pub stored: usize,
    pub removed: usize,
}

const PRODUCT_COLUMNS: &str = "vendor_slug, code, name, validation_type, product_type, \
     supports_wildcard, supports_san, max_domains, min_years, max_years, price_table, \
     vendor_extra, synced_at";

#[derive(Clone)]
pub struct ProductStore {
    db: Db,
}

impl ProductStore {
    pub fn initialize(db: Db) -> Result<Self> {
        Ok(Self { db })
    }

    /// Replaces every stored product of `vendor` in one transaction.
    pub fn replace_vendor_catalog(
        &self,
        vendor: &str,
        products: &[CanonicalProduct],
    ) -> Result<CatalogReplaceSummary> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let previous: i64 = tx.query_row(
            "SELECT COUNT(*) FROM products WHERE vendor_slug = ?1",
            params![vendor],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM products WHERE vendor_slug = ?1", params![vendor])?;

        let mut stored = 0;
        for product in products {
            if product.vendor != vendor {
                return Err(anyhow!(
                    "product {} belongs to {}, not {vendor}",
                    product.code,
                    product.vendor
                ));
            }
            // Duplicate codes in one fetch: last one wins.
            Self::upsert_with_conn(&tx, product, &now)
                .with_context(|| format!("failed to store product {}", product.code))?;
            stored += 1;
        }

        let current: i64 = tx.query_row(
            "SELECT COUNT(*) FROM products WHERE vendor_slug = ?1",
            params![vendor],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let removed = (previous - current).max(0) as usize;
        Ok(CatalogReplaceSummary { stored, removed })
    }

    /// Swaps the price table of one stored product and re-derives its year range.
    pub fn update_pricing(&self, vendor: &str, code: &str, prices: &PriceTable) -> Result<bool> {
        let conn = self.lock_conn()?;
        let Some(existing) = Self::get_with_conn(&conn, vendor, code)? else {
            return Ok(false);
        };

        let mut product = existing.product;
        product.price_table = prices.clone();
        let product = product.with_observed_periods();

        let updated = conn.execute(
            r#"
            UPDATE products
            SET price_table = ?3, min_years = ?4, max_years = ?5, synced_at = ?6
            WHERE vendor_slug = ?1 AND code = ?2
            "#,
            params![
                vendor,
                code,
                serde_json::to_string(&product.price_table)?,
                product.min_years,
                product.max_years,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, vendor: &str, code: &str) -> Result<Option<StoredProduct>> {
        let conn = self.lock_conn()?;
        Self::get_with_conn(&conn, vendor, code)
    }

    pub fn list_for_vendor(&self, vendor: &str) -> Result<Vec<StoredProduct>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE vendor_slug = ?1 ORDER BY name, code"
        ))?;
        let rows = stmt.query_map(params![vendor], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to list products for {vendor}"))
    }

    fn upsert_with_conn(conn: &Connection, product: &CanonicalProduct, now: &str) -> Result<()> {
        conn.execute(
            &format!(
                r#"
                INSERT INTO products ({PRODUCT_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(vendor_slug, code) DO UPDATE
                SET name = excluded.name,
                    validation_type = excluded.validation_type,
                    product_type = excluded.product_type,
                    supports_wildcard = excluded.supports_wildcard,
                    supports_san = excluded.supports_san,
                    max_domains = excluded.max_domains,
                    min_years = excluded.min_years,
                    max_years = excluded.max_years,
                    price_table = excluded.price_table,
                    vendor_extra = excluded.vendor_extra,
                    synced_at = excluded.synced_at
                "#
            ),
            params![
                product.vendor,
                product.code,
                product.name,
                product.validation_type.as_str(),
                product.product_type.as_str(),
                product.supports_wildcard,
                product.supports_san,
                product.max_domains,
                product.min_years,
                product.max_years,
                serde_json::to_string(&product.price_table)?,
                serde_json::to_string(&product.vendor_extra)?,
                now,
            ],
        )?;
        Ok(())
    }

    fn get_with_conn(conn: &Connection, vendor: &str, code: &str) -> Result<Option<StoredProduct>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE vendor_slug = ?1 AND code = ?2"
        ))?;
        let record = stmt
            .query_row(params![vendor, code], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StoredProduct> {
        let validation: String = row.get(3)?;
        let product_type: String = row.get(4)?;
        let price_table: String = row.get(10)?;
        let vendor_extra: String = row.get(11)?;
        let synced_at: String = row.get(12)?;

        let price_table = serde_json::from_str(&price_table).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let synced_at = DateTime::parse_from_rfc3339(&synced_at)
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(err))
            })?
            .with_timezone(&Utc);

        Ok(StoredProduct {
            product: CanonicalProduct {
                vendor: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                validation_type: ValidationType::from_vendor(&validation).unwrap_or(ValidationType::Dv),
                product_type: ProductType::parse(&product_type).unwrap_or(ProductType::Ssl),
                supports_wildcard: row.get(5)?,
                supports_san: row.get(6)?,
                max_domains: row.get(7)?,
                min_years: row.get(8)?,
                max_years: row.get(9)?,
                price_table,
                vendor_extra: serde_json::from_str(&vendor_extra).unwrap_or_default(),
            },
            synced_at,
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock_conn()
            .map_err(|err| anyhow!("products db mutex poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PriceTierKind;
    use rust_decimal::Decimal;
    use serde_json::Map;
    use std::fs;
    use uuid::Uuid;

    fn product(code: &str, name: &str) -> CanonicalProduct {
        let mut price_table = PriceTable::default();
        price_table.insert(PriceTierKind::Base, 12, Decimal::new(599, 2));
        price_table.insert(PriceTierKind::Base, 24, Decimal::new(1099, 2));
        CanonicalProduct {
            code: code.to_string(),
            name: name.to_string(),
            vendor: "gogetssl".to_string(),
            validation_type: ValidationType::Dv,
            product_type: ProductType::Ssl,
            supports_wildcard: false,
            supports_san: false,
            max_domains: 1,
            min_years: 1,
            max_years: 2,
            price_table,
            vendor_extra: Map::new(),
        }
    }

    #[test]
    fn replacing_catalog_removes_vanished_products() -> Result<()> {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sslreseller_products_test_{}", Uuid::new_v4().as_simple()));
        let db = Db::initialize_with_path(&dir)?;
        let store = ProductStore::initialize(db)?;

        let first = store.replace_vendor_catalog("gogetssl", &[
            product("71", "PositiveSSL"),
            product("72", "EssentialSSL"),
        ])?;
        assert_eq!(first, CatalogReplaceSummary { stored: 2, removed: 0 });

        let second = store.replace_vendor_catalog("gogetssl", &[product("71", "PositiveSSL")])?;
        assert_eq!(second, CatalogReplaceSummary { stored: 1, removed: 1 });

        let listed = store.list_for_vendor("gogetssl")?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].product, product("71", "PositiveSSL"));

        drop(store);
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn foreign_vendor_products_are_rejected() -> Result<()> {
        let store = ProductStore::initialize(Db::open_in_memory()?)?;
        store.replace_vendor_catalog("gogetssl", &[product("71", "PositiveSSL")])?;

        let mut foreign = product("99", "Other");
        foreign.vendor = "nicsrs".to_string();
        assert!(store.replace_vendor_catalog("gogetssl", &[foreign]).is_err());
        // The failed replacement rolled back.
        assert_eq!(store.list_for_vendor("gogetssl")?.len(), 1);
        Ok(())
    }

    #[test]
    fn pricing_update_rederives_year_range() -> Result<()> {
        let store = ProductStore::initialize(Db::open_in_memory()?)?;
        store.replace_vendor_catalog("gogetssl", &[product("71", "PositiveSSL")])?;

        let mut prices = PriceTable::default();
        prices.insert(PriceTierKind::Base, 36, Decimal::new(1500, 2));
        assert!(store.update_pricing("gogetssl", "71", &prices)?);
        assert!(!store.update_pricing("gogetssl", "404", &prices)?);

        let stored = store
            .get("gogetssl", "71")?
            .ok_or_else(|| anyhow!("expected stored product"))?;
        assert_eq!(stored.product.min_years, 3);
        assert_eq!(stored.product.max_years, 3);
        assert_eq!(stored.product.price_table.price(PriceTierKind::Base, 24), None);
        Ok(())
    }
}
