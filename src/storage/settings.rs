use std::collections::HashMap;
use std::sync::MutexGuard;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::storage::db::Db;

#[derive(Clone, Debug)]
pub struct ProviderSettingRecord {
    pub slug: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Persisted enable/disable flags for providers. A provider with no row is enabled.
#[derive(Clone)]
pub struct ProviderSettingsStore {
    db: Db,
}

impl ProviderSettingsStore {
    pub fn initialize(db: Db) -> Result<Self> {
        Ok(Self { db })
    }

    pub fn get(&self, slug: &str) -> Result<Option<ProviderSettingRecord>> {
        let conn = self.lock_conn()?;
        Self::get_with_conn(&conn, slug)
    }

    pub fn is_enabled(&self, slug: &str) -> Result<bool> {
        Ok(self.get(slug)?.is_none_or(|record| record.enabled))
    }

    pub fn set_enabled(&self, slug: &str, enabled: bool) -> Result<ProviderSettingRecord> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            r#"
            INSERT INTO provider_settings (slug, enabled, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(slug) DO UPDATE
            SET enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
            params![slug, enabled, now],
        )?;

        if updated == 0 {
            return Err(anyhow!("failed to upsert provider setting: {slug}"));
        }

        Self::get_with_conn(&conn, slug)?
            .ok_or_else(|| anyhow!("provider setting not found after upsert: {slug}"))
    }

    pub fn all(&self) -> Result<HashMap<String, bool>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT slug, enabled FROM provider_settings")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    fn get_with_conn(conn: &Connection, slug: &str) -> Result<Option<ProviderSettingRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT slug, enabled, updated_at
            FROM provider_settings
            WHERE slug = ?1
            "#,
        )?;

        let record = stmt
            .query_row(params![slug], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProviderSettingRecord> {
        let updated_at_str: String = row.get(2)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })?
            .with_timezone(&Utc);
        Ok(ProviderSettingRecord {
            slug: row.get(0)?,
            enabled: row.get(1)?,
            updated_at,
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock_conn()
            .map_err(|err| anyhow!("provider settings db mutex poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    fn create_temp_dir() -> Result<std::path::PathBuf> {
        let mut path = std::env::temp_dir();
        path.push(format!("sslreseller_settings_test_{}", Uuid::new_v4().as_simple()));
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    #[test]
    fn providers_default_to_enabled_and_toggle() -> Result<()> {
        let temp_dir = create_temp_dir()?;
        let db = Db::initialize_with_path(&temp_dir)?;
        let store = ProviderSettingsStore::initialize(db)?;

        assert!(store.get("sectigo")?.is_none());
        assert!(store.is_enabled("sectigo")?);

        let disabled = store.set_enabled("sectigo", false)?;
        assert_eq!(disabled.slug, "sectigo");
        assert!(!disabled.enabled);
        assert!(!store.is_enabled("sectigo")?);

        store.set_enabled("sectigo", true)?;
        assert!(store.is_enabled("sectigo")?);
        assert_eq!(store.all()?.get("sectigo"), Some(&true));

        drop(store);
        fs::remove_dir_all(&temp_dir)?;
        Ok(())
    }
}
