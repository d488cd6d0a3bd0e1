use std::path::PathBuf;
use std::sync::Arc;
use std::{env, fs};

use anyhow::{Context, Result};
use rusqlite::params;
use uuid::Uuid;

use sslreseller_core::credentials::{Credentials, StaticCredentialSource};
use sslreseller_core::logging;
use sslreseller_core::providers::testing::ScriptedTransport;
use sslreseller_core::providers::ProviderRegistry;
use sslreseller_core::storage::{Db, ProductStore, ProviderSettingsStore, SqliteOrderStore};
use sslreseller_core::Config;

/// File-backed database plus a scripted registry, removed again on drop.
pub struct TestEnv {
    pub dir: PathBuf,
    pub db: Db,
    pub scripted: Arc<ScriptedTransport>,
    pub registry: ProviderRegistry,
    pub orders: Arc<SqliteOrderStore>,
    pub products: ProductStore,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        logging::init_with_default("debug");
        let dir = env::temp_dir().join(format!(
            "sslreseller_integration_{}",
            Uuid::new_v4().as_simple()
        ));
        let db = Db::initialize_with_path(&dir)?;
        let scripted = Arc::new(ScriptedTransport::new());
        let config = Config {
            data_dir: dir.clone(),
            ..Config::default()
        }
        .without_pacing();
        let registry = ProviderRegistry::new(
            Arc::new(all_vendor_credentials()),
            ProviderSettingsStore::initialize(db.clone())?,
            scripted.clone(),
            config,
        );
        Ok(Self {
            orders: Arc::new(SqliteOrderStore::initialize(db.clone())?),
            products: ProductStore::initialize(db.clone())?,
            dir,
            db,
            scripted,
            registry,
        })
    }

    pub fn seed_legacy_a(&self, id: i64, module: &str, status: &str, config_data: &str) -> Result<()> {
        self.db
            .lock_conn()?
            .execute(
                "INSERT INTO legacy_a_orders (id, module, status, config_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, '2025-01-15 09:30:00')",
                params![id, module, status, config_data],
            )
            .context("failed to seed legacy_a_orders")?;
        Ok(())
    }

    pub fn seed_legacy_b(
        &self,
        id: i64,
        provider: &str,
        common_name: Option<&str>,
        status: &str,
        valid_until: &str,
    ) -> Result<()> {
        self.db
            .lock_conn()?
            .execute(
                "INSERT INTO legacy_b_orders (id, provider, cert_id, common_name, order_status, valid_from, valid_until, raw_response, created_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, '0000-00-00', ?6, '{}', '2025-02-01')",
                params![id, provider, format!("CERT-{id}"), common_name, status, valid_until],
            )
            .context("failed to seed legacy_b_orders")?;
        Ok(())
    }

    pub fn count(&self, sql: &str) -> Result<i64> {
        Ok(self.db.lock_conn()?.query_row(sql, [], |row| row.get(0))?)
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

pub fn all_vendor_credentials() -> StaticCredentialSource {
    StaticCredentialSource::new()
        .with(
            "gogetssl",
            Credentials::new().with("username", "reseller").with("password", "secret"),
        )
        .with("nicsrs", Credentials::new().with("apiToken", "tok"))
        .with(
            "thesslstore",
            Credentials::new().with("partner_code", "P1").with("auth_token", "T1"),
        )
        .with(
            "sectigo",
            Credentials::new()
                .with("login_name", "partner")
                .with("login_password", "secret"),
        )
}
