//! Scheduler-facing operations that pull vendor state into local storage.

use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::RemoteOrderStatus;
use crate::domain::first_storable_domain;
use crate::providers::ProviderRegistry;
use crate::storage::{
    InsertOutcome, NewCanonicalOrder, Order, OrderStore, ProductStore, RemoteStateUpdate,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogSyncSummary {
    pub vendor: String,
    pub fetched: usize,
    pub stored: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum ImportOutcome {
    Created(i64),
    Updated(i64),
}

impl ImportOutcome {
    pub fn id(&self) -> i64 {
        match self {
            ImportOutcome::Created(id) | ImportOutcome::Updated(id) => *id,
        }
    }
}

/// Fetches a vendor catalog and replaces that vendor's stored products.
/// An empty fetch leaves the stored catalog alone.
pub fn sync_catalog(
    registry: &ProviderRegistry,
    products: &ProductStore,
    slug: &str,
) -> Result<CatalogSyncSummary> {
    let provider = registry.get(slug)?;
    let fetched = provider.fetch_products()?;
    let vendor = provider.slug().to_string();

    if fetched.is_empty() {
        warn!("[sync] {vendor} returned an empty catalog; keeping stored products");
        return Ok(CatalogSyncSummary {
            vendor,
            fetched: 0,
            stored: 0,
            removed: 0,
        });
    }

    let summary = products.replace_vendor_catalog(&vendor, &fetched)?;
    info!(
        "[sync] {vendor} catalog: {} fetched, {} stored, {} removed",
        fetched.len(),
        summary.stored,
        summary.removed
    );
    Ok(CatalogSyncSummary {
        vendor,
        fetched: fetched.len(),
        stored: summary.stored,
        removed: summary.removed,
    })
}

/// Refreshes one stored product's price table. Returns `false` when the
/// product is not in the local catalog.
pub fn refresh_pricing(
    registry: &ProviderRegistry,
    products: &ProductStore,
    slug: &str,
    product_code: &str,
) -> Result<bool> {
    let provider = registry.get(slug)?;
    let prices = provider.fetch_pricing(product_code)?;
    let updated = products.update_pricing(provider.slug(), product_code, &prices)?;
    if !updated {
        warn!("[sync] {} product {product_code} is not in the local catalog", provider.slug());
    }
    Ok(updated)
}

/// Creates or updates the canonical row for a remote order. Rows created here
/// carry no claim back-reference.
pub fn import_remote_order(
    registry: &ProviderRegistry,
    orders: &dyn OrderStore,
    slug: &str,
    remote_id: &str,
) -> Result<ImportOutcome> {
    let provider = registry.get(slug)?;
    let vendor = provider.slug();
    let remote = provider.get_order_status(remote_id)?;
    let domain = remote_domain(&remote);

    if let Some(existing) = orders.find_by_remote(vendor, remote_id)? {
        orders.update_remote_state(existing.id, &state_update(&remote, domain))?;
        info!("[sync] refreshed imported {vendor} order {remote_id} (#{})", existing.id);
        return Ok(ImportOutcome::Updated(existing.id));
    }

    let domain = domain.ok_or_else(|| anyhow!("{vendor} order {remote_id} has no usable domain"))?;
    let order = NewCanonicalOrder {
        vendor_slug: vendor.to_string(),
        remote_id: Some(remote_id.to_string()),
        domain,
        status: remote.status.clone(),
        begin_date: remote.begin_date,
        end_date: remote.end_date,
        vendor_payload: Value::Object(remote.vendor_extra.clone()),
        claimed_from: None,
        created_at: None,
    };
    match orders.insert_canonical(&order)? {
        InsertOutcome::Inserted(id) => {
            info!("[sync] imported {vendor} order {remote_id} as #{id}");
            Ok(ImportOutcome::Created(id))
        }
        InsertOutcome::ClaimConflict => Err(anyhow!("unexpected claim conflict importing {remote_id}")),
    }
}

/// Pulls the current remote state of a canonical order and stores it in place.
pub fn refresh_order_status(
    registry: &ProviderRegistry,
    orders: &dyn OrderStore,
    canonical_id: i64,
) -> Result<Order> {
    let order = orders
        .canonical_order(canonical_id)?
        .ok_or_else(|| anyhow!("canonical order {canonical_id} not found"))?;
    let vendor = order
        .vendor_slug
        .as_deref()
        .ok_or_else(|| anyhow!("canonical order {canonical_id} has no vendor"))?;
    let remote_id = order
        .remote_id
        .as_deref()
        .ok_or_else(|| anyhow!("canonical order {canonical_id} has no remote id"))?;

    let remote = registry.get(vendor)?.get_order_status(remote_id)?;
    orders.update_remote_state(canonical_id, &state_update(&remote, remote_domain(&remote)))?;
    info!(
        "[sync] order #{canonical_id} is now {}",
        remote.status.label()
    );

    orders
        .canonical_order(canonical_id)?
        .ok_or_else(|| anyhow!("canonical order {canonical_id} vanished during refresh"))
}

fn remote_domain(remote: &RemoteOrderStatus) -> Option<String> {
    remote
        .domains
        .iter()
        .find_map(|domain| first_storable_domain(domain))
}

fn state_update(remote: &RemoteOrderStatus, domain: Option<String>) -> RemoteStateUpdate {
    RemoteStateUpdate {
        status: remote.status.clone(),
        domain,
        begin_date: remote.begin_date,
        end_date: remote.end_date,
        vendor_payload: Value::Object(remote.vendor_extra.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{Credentials, StaticCredentialSource};
    use crate::normalize::status::OrderStatus;
    use crate::providers::http::HttpResponse;
    use crate::providers::testing::ScriptedTransport;
    use crate::storage::{ClaimKey, Db, OriginTable, ProviderSettingsStore, SqliteOrderStore};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn setup(scripted: &Arc<ScriptedTransport>) -> Result<(Db, ProviderRegistry)> {
        let db = Db::open_in_memory()?;
        let credentials = StaticCredentialSource::new().with(
            "gogetssl",
            Credentials::new().with("username", "reseller").with("password", "secret"),
        );
        scripted.respond("/auth/", HttpResponse::json(200, json!({"key": "session"})));
        let registry = ProviderRegistry::new(
            Arc::new(credentials),
            ProviderSettingsStore::initialize(db.clone())?,
            scripted.clone(),
            Config::default().without_pacing(),
        );
        Ok((db, registry))
    }

    fn status_body(status: &str, valid_till: &str) -> HttpResponse {
        HttpResponse::json(
            200,
            json!({
                "status": status,
                "domain": "Shop.Example.com",
                "valid_from": "2025-03-01",
                "valid_till": valid_till,
                "product_id": 71
            }),
        )
    }

    #[test]
    fn catalog_sync_replaces_vendor_rows() -> Result<()> {
        let scripted = Arc::new(ScriptedTransport::new());
        let (db, registry) = setup(&scripted)?;
        scripted.respond(
            "/products/ssl/",
            HttpResponse::json(200, json!({"products": [{"id": 71, "product": "PositiveSSL", "prices": {"1": "5.99"}}]})),
        );
        scripted.respond("/products/codesign/", HttpResponse::json(200, json!({"products": []})));
        scripted.respond("/products/smime/", HttpResponse::json(200, json!({"products": []})));

        let products = ProductStore::initialize(db)?;
        let summary = sync_catalog(&registry, &products, "gogetssl")?;
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(products.list_for_vendor("gogetssl")?.len(), 1);
        Ok(())
    }

    #[test]
    fn import_creates_then_updates_canonical_row() -> Result<()> {
        let scripted = Arc::new(ScriptedTransport::new());
        let (db, registry) = setup(&scripted)?;
        let orders = SqliteOrderStore::initialize(db)?;

        // Replies are handed out in order, the last one repeats.
        scripted.respond("/orders/status/555/", status_body("processing", "0000-00-00"));
        scripted.respond("/orders/status/555/", status_body("active", "2026-03-01"));

        let created = import_remote_order(&registry, &orders, "gogetssl", "555")?;
        let ImportOutcome::Created(id) = created else {
            return Err(anyhow!("expected a new row, got {created:?}"));
        };
        let first = orders
            .canonical_order(id)?
            .ok_or_else(|| anyhow!("imported order missing"))?;
        assert_eq!(first.status, OrderStatus::Processing);
        assert_eq!(first.end_date, None);

        let updated = import_remote_order(&registry, &orders, "gogetssl", "555")?;
        assert_eq!(updated, ImportOutcome::Updated(id));

        let order = orders
            .canonical_order(id)?
            .ok_or_else(|| anyhow!("imported order missing"))?;
        assert_eq!(order.status, OrderStatus::Issued);
        assert_eq!(order.domain.as_deref(), Some("shop.example.com"));
        assert_eq!(order.end_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(order.claimed_from, None);
        Ok(())
    }

    #[test]
    fn status_refresh_keeps_claim_reference() -> Result<()> {
        let scripted = Arc::new(ScriptedTransport::new());
        let (db, registry) = setup(&scripted)?;
        let orders = SqliteOrderStore::initialize(db)?;
        let key = ClaimKey::new(OriginTable::LegacyA, 12);
        let InsertOutcome::Inserted(id) = orders.insert_canonical(&NewCanonicalOrder {
            vendor_slug: "gogetssl".into(),
            remote_id: Some("777".into()),
            domain: "shop.example.com".into(),
            status: OrderStatus::Processing,
            begin_date: None,
            end_date: None,
            vendor_payload: json!({}),
            claimed_from: Some(key),
            created_at: None,
        })?
        else {
            return Err(anyhow!("expected insert"));
        };

        scripted.respond("/orders/status/777/", status_body("revoked", "2026-03-01"));
        let refreshed = refresh_order_status(&registry, &orders, id)?;
        assert_eq!(refreshed.status, OrderStatus::Revoked);
        assert_eq!(refreshed.claimed_from, Some(key));
        assert_eq!(refreshed.vendor_payload, json!({"product_id": 71}));

        assert!(refresh_order_status(&registry, &orders, 9999).is_err());
        Ok(())
    }
}
