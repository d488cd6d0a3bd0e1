use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::json;

use sslreseller_core::normalize::OrderStatus;
use sslreseller_core::providers::http::HttpResponse;
use sslreseller_core::reconcile::{Aggregator, ClaimEngine, ClaimScope, OrderFilter};
use sslreseller_core::storage::{ClaimKey, OrderStore, OriginTable};
use sslreseller_core::{sync, ClaimErrorKind, Config};

use super::test_utils::TestEnv;

fn config() -> Config {
    Config {
        expiring_days: 30,
        recent_limit: 5,
        ..Config::default()
    }
}

fn today() -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(2025, 6, 1).ok_or_else(|| anyhow!("invalid date"))
}

#[test]
fn claiming_twice_keeps_a_single_canonical_row() -> Result<()> {
    let env = TestEnv::new()?;
    env.seed_legacy_b(42, "nicsrs", Some("Shop.Example.com"), "complete", "2026-01-01")?;
    let engine = ClaimEngine::new(env.orders.clone());

    let first = engine.claim(OriginTable::LegacyB, 42);
    assert!(first.success, "{}", first.message);
    let id = first
        .new_canonical_id
        .ok_or_else(|| anyhow!("claim returned no id"))?;

    let second = engine.claim(OriginTable::LegacyB, 42);
    assert!(!second.success);
    assert_eq!(second.message, "AlreadyClaimed");
    assert_eq!(env.count("SELECT COUNT(*) FROM orders")?, 1);

    let order = env
        .orders
        .canonical_order(id)?
        .ok_or_else(|| anyhow!("canonical order missing"))?;
    assert_eq!(order.claimed_from, Some(ClaimKey::new(OriginTable::LegacyB, 42)));
    assert_eq!(order.domain.as_deref(), Some("shop.example.com"));
    assert_eq!(order.remote_id.as_deref(), Some("CERT-42"));
    assert_eq!(order.status, OrderStatus::Issued);
    assert_eq!(order.begin_date, None);

    // Legacy rows stay untouched.
    assert_eq!(env.count("SELECT COUNT(*) FROM legacy_b_orders WHERE id = 42")?, 1);

    let missing = engine.claim(OriginTable::LegacyA, 999);
    assert_eq!(missing.error_kind, Some(ClaimErrorKind::NotFound));
    Ok(())
}

#[test]
fn batch_claim_tallies_every_row_in_scope() -> Result<()> {
    let env = TestEnv::new()?;
    env.seed_legacy_a(
        1,
        "gogetssl",
        "active",
        r#"{"domain": "a.example.com", "order_id": "9001", "valid_till": "2025-12-31"}"#,
    )?;
    env.seed_legacy_a(2, "letsencrypt", "active", r#"{"domain": "b.example.com"}"#)?;
    env.seed_legacy_a(3, "gogetssl", "processing", r#"{"order_id": "9003"}"#)?;
    env.seed_legacy_b(5, "nicsrs", Some("c.example.com"), "complete", "2026-01-01")?;
    env.seed_legacy_b(6, "nicsrs", None, "complete", "2026-01-01")?;
    env.seed_legacy_b(7, "NicSRS_SSL", Some("d.example.com"), "complete", "2026-01-01")?;

    let engine = ClaimEngine::new(env.orders.clone());
    assert!(engine.claim(OriginTable::LegacyB, 5).success);

    let batch = engine.claim_batch(&ClaimScope::All)?;
    assert_eq!(batch.total_count, 5);
    assert_eq!(batch.claimed_count, 2);
    assert_eq!(batch.failed_count, 3);
    assert_eq!(batch.skipped_count, 0);
    assert_eq!(
        batch.claimed_count + batch.failed_count + batch.skipped_count,
        batch.total_count
    );
    assert!(batch
        .errors
        .iter()
        .all(|failure| failure.kind == ClaimErrorKind::Malformed));
    let failed: Vec<(OriginTable, i64)> = batch
        .errors
        .iter()
        .map(|failure| (failure.origin_table, failure.origin_id))
        .collect();
    assert_eq!(
        failed,
        vec![
            (OriginTable::LegacyA, 2),
            (OriginTable::LegacyA, 3),
            (OriginTable::LegacyB, 6)
        ]
    );
    assert_eq!(env.count("SELECT COUNT(*) FROM orders")?, 3);

    let rerun = engine.claim_batch(&ClaimScope::All)?;
    assert_eq!(rerun.total_count, 3);
    assert_eq!(rerun.claimed_count, 0);
    assert_eq!(env.count("SELECT COUNT(*) FROM orders")?, 3);
    Ok(())
}

#[test]
fn vendor_scoped_batch_ignores_other_vendors() -> Result<()> {
    let env = TestEnv::new()?;
    env.seed_legacy_a(1, "gogetssl", "active", r#"{"domain": "a.example.com"}"#)?;
    env.seed_legacy_b(2, "nicsrs", Some("b.example.com"), "complete", "2026-01-01")?;
    env.seed_legacy_b(3, "nicsrs_ssl", Some("c.example.com"), "complete", "2026-01-01")?;

    let engine = ClaimEngine::new(env.orders.clone());
    let batch = engine.claim_batch(&ClaimScope::parse("NicSRS"))?;
    assert_eq!(batch.total_count, 2);
    assert_eq!(batch.claimed_count, 2);
    assert_eq!(
        env.count("SELECT COUNT(*) FROM orders WHERE vendor_slug = 'nicsrs'")?,
        2
    );
    assert_eq!(env.count("SELECT COUNT(*) FROM orders")?, 2);
    Ok(())
}

#[test]
fn aggregate_counts_claimed_rows_once() -> Result<()> {
    let env = TestEnv::new()?;
    env.seed_legacy_a(
        1,
        "gogetssl",
        "active",
        r#"{"domain": "a.example.com", "valid_till": "2025-06-20"}"#,
    )?;
    env.seed_legacy_b(2, "nicsrs", Some("b.example.com"), "complete", "2025-05-01")?;
    env.seed_legacy_b(3, "thesslstore", Some("c.example.com"), "Active", "2027-01-01")?;

    let aggregator = Aggregator::new(env.orders.clone(), &config());
    let before = aggregator.report_as_of(today()?)?;
    assert_eq!(before.total, 3);

    let engine = ClaimEngine::new(env.orders.clone());
    assert!(engine.claim(OriginTable::LegacyB, 2).success);
    assert!(engine.claim(OriginTable::LegacyA, 1).success);

    let after = aggregator.report_as_of(today()?)?;
    assert_eq!(after.total, 3);
    assert_eq!(after.by_source.get("canonical"), Some(&2));
    assert_eq!(after.by_source.get("legacy_b"), Some(&1));
    assert_eq!(after.by_source.get("legacy_a"), None);
    assert_eq!(after.by_provider.get("nicsrs"), Some(&1));
    assert_eq!(after.by_provider.get("gogetssl"), Some(&1));
    assert_eq!(after.by_provider.get("thesslstore"), Some(&1));
    assert_eq!(after.expired, 1);
    assert_eq!(after.expiring_soon, 1);
    assert_eq!(after.recent.len(), 3);

    let page = aggregator.list_orders(&OrderFilter {
        domain_contains: Some("B.EXAMPLE".to_string()),
        ..OrderFilter::default()
    })?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].origin_table, OriginTable::Canonical);
    Ok(())
}

#[test]
fn claim_keeps_legacy_creation_time_and_recent_feed() -> Result<()> {
    let env = TestEnv::new()?;
    for (id, domain, created_on) in [
        (1, "old.example.com", "2019-01-01"),
        (2, "new.example.com", "2025-05-01"),
    ] {
        env.db.lock_conn()?.execute(
            "INSERT INTO legacy_b_orders (id, provider, cert_id, common_name, order_status, valid_from, valid_until, raw_response, created_on)
             VALUES (?1, 'nicsrs', ?2, ?3, 'complete', '0000-00-00', '2026-01-01', '{}', ?4)",
            rusqlite::params![id, format!("CERT-{id}"), domain, created_on],
        )?;
    }
    let aggregator = Aggregator::new(
        env.orders.clone(),
        &Config {
            recent_limit: 1,
            ..config()
        },
    );
    let before = aggregator.report_as_of(today()?)?;
    assert_eq!(before.recent[0].domain.as_deref(), Some("new.example.com"));

    let id = ClaimEngine::new(env.orders.clone())
        .claim(OriginTable::LegacyB, 1)
        .new_canonical_id
        .ok_or_else(|| anyhow!("claim failed"))?;
    let claimed = env
        .orders
        .canonical_order(id)?
        .ok_or_else(|| anyhow!("canonical order missing"))?;
    assert_eq!(
        claimed.created_at,
        NaiveDate::from_ymd_opt(2019, 1, 1).and_then(|date| date.and_hms_opt(0, 0, 0))
    );

    let after = aggregator.report_as_of(today()?)?;
    assert_eq!(after.recent[0].domain.as_deref(), Some("new.example.com"));
    assert_eq!(after.recent[0].created_at, before.recent[0].created_at);

    let listed = aggregator.list_orders(&OrderFilter::default())?;
    let domains: Vec<Option<&str>> = listed
        .items
        .iter()
        .map(|order| order.domain.as_deref())
        .collect();
    assert_eq!(domains, vec![Some("new.example.com"), Some("old.example.com")]);
    Ok(())
}

#[test]
fn status_refresh_updates_claimed_order_in_place() -> Result<()> {
    let env = TestEnv::new()?;
    env.seed_legacy_b(42, "nicsrs", Some("shop.example.com"), "pending", "0000-00-00")?;
    let engine = ClaimEngine::new(env.orders.clone());
    let id = engine
        .claim(OriginTable::LegacyB, 42)
        .new_canonical_id
        .ok_or_else(|| anyhow!("claim failed"))?;

    env.scripted.respond(
        "/collect",
        HttpResponse::json(
            200,
            json!({"code": 1, "data": {
                "certificate": "-----BEGIN CERTIFICATE-----",
                "beginDate": "2025-06-01",
                "endDate": "2026-06-01"
            }}),
        ),
    );
    let refreshed = sync::refresh_order_status(&env.registry, env.orders.as_ref(), id)?;
    assert_eq!(refreshed.status, OrderStatus::Issued);
    assert_eq!(refreshed.end_date, NaiveDate::from_ymd_opt(2026, 6, 1));
    assert_eq!(refreshed.domain.as_deref(), Some("shop.example.com"));
    assert_eq!(refreshed.claimed_from, Some(ClaimKey::new(OriginTable::LegacyB, 42)));
    assert_eq!(
        env.scripted
            .requests()
            .pop()
            .and_then(|request| request.form_value("certId").map(str::to_string)),
        Some("CERT-42".to_string())
    );

    let dyn_store: Arc<dyn OrderStore> = env.orders.clone();
    assert_eq!(dyn_store.canonical_orders()?.len(), 1);
    Ok(())
}
