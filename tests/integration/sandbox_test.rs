//! Live checks against vendor sandboxes. Built only with the
//! `integration-tests` feature; credentials come from `SSLRESELLER_<SLUG>_<FIELD>`.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use sslreseller_core::credentials::{CredentialSource, EnvCredentialSource};
use sslreseller_core::providers::ProviderRegistry;
use sslreseller_core::storage::{Db, ProviderSettingsStore};
use sslreseller_core::Config;

fn load_sandbox_registry(slug: &str) -> Result<(Db, ProviderRegistry)> {
    let source = EnvCredentialSource::new();
    let credentials = source
        .credentials(slug)
        .map_err(|err| anyhow!("{slug} sandbox credentials are not set: {err}"))?;
    if credentials.get("sandbox").is_none() && credentials.get("base_url").is_none() {
        return Err(anyhow!(
            "refusing to run against {slug} production; set SSLRESELLER_{}_SANDBOX=1",
            slug.to_ascii_uppercase()
        ));
    }
    let db = Db::open_in_memory()?;
    let registry = ProviderRegistry::with_http(
        Arc::new(source),
        ProviderSettingsStore::initialize(db.clone())?,
        Config::default(),
    );
    Ok((db, registry))
}

fn check_connection(slug: &str) -> Result<()> {
    let (_db, registry) = load_sandbox_registry(slug)?;
    let result = registry.test_connection(slug);
    if !result.success {
        return Err(anyhow!("{slug} sandbox connection failed: {}", result.message));
    }
    Ok(())
}

#[test]
fn gogetssl_sandbox_connection_and_balance() -> Result<()> {
    check_connection("gogetssl")?;
    let (_db, registry) = load_sandbox_registry("gogetssl")?;
    let balance = registry.balance("gogetssl");
    if !balance.success {
        return Err(anyhow!("GoGetSSL balance failed: {}", balance.message));
    }
    Ok(())
}

#[test]
fn nicsrs_sandbox_connection() -> Result<()> {
    check_connection("nicsrs")
}

#[test]
fn thesslstore_sandbox_catalog_is_not_empty() -> Result<()> {
    check_connection("thesslstore")?;
    let (_db, registry) = load_sandbox_registry("thesslstore")?;
    let products = registry
        .fetch_products("thesslstore")
        .into_data()
        .ok_or_else(|| anyhow!("TheSSLStore product query failed"))?;
    if products.is_empty() {
        return Err(anyhow!("Expected TheSSLStore sandbox to list products"));
    }
    Ok(())
}

#[test]
fn sectigo_sandbox_connection() -> Result<()> {
    check_connection("sectigo")
}
