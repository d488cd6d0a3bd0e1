use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde_json::json;

use sslreseller_core::catalog::PriceTierKind;
use sslreseller_core::core::types::{DcvMethod, OrderRequest};
use sslreseller_core::normalize::OrderStatus;
use sslreseller_core::providers::http::HttpResponse;
use sslreseller_core::sync::{self, ImportOutcome};
use sslreseller_core::ErrorCategory;

use super::test_utils::TestEnv;

fn request(product_code: &str) -> OrderRequest {
    OrderRequest {
        product_code: product_code.to_string(),
        csr: "-----BEGIN CERTIFICATE REQUEST-----".to_string(),
        domains: vec!["example.com".to_string(), "www.example.com".to_string()],
        period_months: 12,
        ..OrderRequest::default()
    }
}

#[test]
fn session_vendor_retries_once_after_unauthorized() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond("/auth/", HttpResponse::json(200, json!({"key": "stale"})));
    env.scripted.respond("/auth/", HttpResponse::json(200, json!({"key": "fresh"})));
    env.scripted.respond("/account/balance/", HttpResponse::json(401, json!({})));
    env.scripted.respond("/account/balance/", HttpResponse::json(200, json!({"balance": "42.00"})));

    let balance = env.registry.balance("gogetssl");
    if !balance.success {
        return Err(anyhow!("balance failed: {}", balance.message));
    }
    assert_eq!(balance.data, Some(Decimal::new(4200, 2)));
    assert_eq!(env.scripted.count_matching("/auth/"), 2);
    Ok(())
}

#[test]
fn repeated_unauthorized_surfaces_as_auth_error() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond("/auth/", HttpResponse::json(200, json!({"key": "k"})));
    env.scripted.respond("/orders/status/", HttpResponse::json(401, json!({})));

    let result = env.registry.order_status("gogetssl", "100");
    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::AuthError));
    assert_eq!(env.scripted.count_matching("/orders/status/"), 2);
    Ok(())
}

#[test]
fn token_vendor_places_order_through_alias() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond(
        "/place",
        HttpResponse::json(200, json!({"code": 1, "data": {"certId": "CERT-9"}})),
    );

    let placed = env.registry.place_order("NicSRS_SSL", &request("positive-ssl"));
    let placed = placed
        .into_data()
        .ok_or_else(|| anyhow!("expected a placed order"))?;
    assert_eq!(placed.remote_id, "CERT-9");
    assert_eq!(placed.status, OrderStatus::Pending);

    let sent = env
        .scripted
        .requests()
        .pop()
        .ok_or_else(|| anyhow!("no request recorded"))?;
    assert_eq!(sent.form_value("api_token"), Some("tok"));
    assert_eq!(sent.form_value("years"), Some("1"));
    Ok(())
}

#[test]
fn vendor_refusal_is_unsuccessful_action_not_error() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond(
        "/order/certificaterevokerequest/",
        HttpResponse::json(
            200,
            json!({"AuthResponse": {"isError": true, "Message": ["Order is not eligible for revocation"]}}),
        ),
    );

    let result = env.registry.revoke_certificate("thesslstore", "555", "superseded");
    assert!(!result.success);
    assert_eq!(result.error_category, None);
    let action = result.data.ok_or_else(|| anyhow!("expected action data"))?;
    assert!(action.message.contains("not eligible"));
    Ok(())
}

#[test]
fn limited_vendor_rejects_lifecycle_but_orders() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond(
        "/!AutoApplySSL",
        HttpResponse::json(200, json!({"errorCode": 0, "orderNumber": 8801})),
    );

    let placed = env.registry.place_order("comodo", &request("287"));
    assert!(placed.success, "{}", placed.message);

    for result in [
        env.registry.reissue_certificate("sectigo", "8801", &request("287")),
        env.registry.renew_certificate("sectigo", "8801", &request("287")),
        env.registry.cancel_order("sectigo", "8801", "duplicate"),
        env.registry.download_certificate("sectigo", "8801"),
    ] {
        assert!(!result.success);
        assert_eq!(result.error_category, Some(ErrorCategory::Unsupported));
    }
    assert_eq!(env.scripted.count_matching("/!AutoApplySSL"), 1);
    assert_eq!(env.scripted.request_count(), 1);
    Ok(())
}

#[test]
fn dcv_method_change_is_forwarded() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond("/updateDCV", HttpResponse::json(200, json!({"code": 1})));

    let result = env.registry.change_dcv_method(
        "nicsrs",
        "CERT-9",
        "example.com",
        DcvMethod::Cname,
        None,
    );
    assert!(result.success, "{}", result.message);
    assert_eq!(env.scripted.count_matching("/updateDCV"), 1);
    Ok(())
}

#[test]
fn catalog_sync_and_pricing_refresh_round_through_storage() -> Result<()> {
    let env = TestEnv::new()?;
    // Replies are handed out in order, the last one repeats. The first product
    // type query sees the one-year listing, every later call the two-year one.
    env.scripted.respond(
        "/product/query/",
        HttpResponse::json(
            200,
            json!([{
                "AuthResponse": {"isError": false},
                "ProductCode": "positivessl",
                "ProductName": "PositiveSSL",
                "isDVProduct": true,
                "PricingInfo": [{"NumberOfMonths": 12, "Price": "7.50"}]
            }]),
        ),
    );
    env.scripted.respond(
        "/product/query/",
        HttpResponse::json(
            200,
            json!([{
                "AuthResponse": {"isError": false},
                "ProductCode": "positivessl",
                "ProductName": "PositiveSSL",
                "PricingInfo": [
                    {"NumberOfMonths": 12, "Price": "7.00"},
                    {"NumberOfMonths": 24, "Price": "13.00"}
                ]
            }]),
        ),
    );

    let summary = sync::sync_catalog(&env.registry, &env.products, "thesslstore")?;
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.removed, 0);
    let synced = env
        .products
        .get("thesslstore", "positivessl")?
        .ok_or_else(|| anyhow!("product not stored"))?;
    assert_eq!(synced.product.max_years, 1);

    assert!(sync::refresh_pricing(&env.registry, &env.products, "thesslstore", "positivessl")?);

    let stored = env
        .products
        .get("thesslstore", "positivessl")?
        .ok_or_else(|| anyhow!("product not stored"))?;
    assert_eq!(stored.product.max_years, 2);
    assert_eq!(
        stored.product.price_table.price(PriceTierKind::Base, 24),
        Some(Decimal::new(1300, 2))
    );
    Ok(())
}

#[test]
fn remote_import_creates_unclaimed_canonical_order() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond(
        "/order/status/",
        HttpResponse::json(
            200,
            json!({
                "AuthResponse": {"isError": false},
                "OrderStatus": {"MajorStatus": "Active"},
                "CommonName": "bücher.example",
                "CertificateStartDate": "01/15/2025",
                "CertificateEndDate": "01/15/2026"
            }),
        ),
    );

    let outcome = sync::import_remote_order(&env.registry, env.orders.as_ref(), "thesslstore", "777")?;
    let ImportOutcome::Created(id) = outcome else {
        return Err(anyhow!("expected a new canonical order, got {outcome:?}"));
    };
    assert_eq!(
        env.count("SELECT COUNT(*) FROM orders WHERE claim_origin_table IS NULL")?,
        1
    );
    let domain: String = env.db.lock_conn()?.query_row(
        "SELECT domain FROM orders WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    assert_eq!(domain, "xn--bcher-kva.example");
    Ok(())
}

#[test]
fn disabled_provider_is_not_reachable_until_reenabled() -> Result<()> {
    let env = TestEnv::new()?;
    env.scripted.respond("/account/balance/", HttpResponse::json(200, json!({"balance": "1.00"})));
    env.scripted.respond("/auth/", HttpResponse::json(200, json!({"key": "k"})));

    env.registry.set_enabled("GoGetSSL", false)?;
    let result = env.registry.balance("gogetssl");
    assert!(!result.success);
    assert_eq!(result.error_category, Some(ErrorCategory::Configuration));
    assert_eq!(env.scripted.request_count(), 0);

    let listed = env
        .registry
        .available()
        .into_iter()
        .find(|info| info.slug == "gogetssl")
        .ok_or_else(|| anyhow!("gogetssl not listed"))?;
    assert!(!listed.enabled);

    env.registry.set_enabled("gogetssl", true)?;
    assert!(env.registry.balance("gogetssl").success);
    Ok(())
}
