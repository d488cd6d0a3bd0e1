//! GoGetSSL reseller API adapter.
//!
//! Session-token authenticated: `POST /auth/` returns a key that is passed as
//! the `auth_key` query parameter on every other call.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::catalog::{CanonicalProduct, PriceTable, ProductType, ValidationType};
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, CertificateBundle, ConnectionResult, DcvMethod, OrderRequest, PlacedOrder,
    RemoteOrderStatus,
};
use crate::credentials::Credentials;
use crate::normalize::dates::parse_vendor_date_value;
use crate::normalize::pricing::{table_from_period_maps, PeriodUnit};
use crate::normalize::status::{normalize_status, OrderStatus, StatusTable};

use super::auth::{SessionTokenAuth, VendorClient};
use super::http::{status_error, HttpRequest, HttpResponse, HttpTransport};
use super::payload::{first_text, flag, number, pick, string_list, text};
use super::{business_outcome, Capability, Provider, ProviderTier, VendorDescriptor};

pub const SLUG: &str = "gogetssl";
const DISPLAY_NAME: &str = "GoGetSSL";

pub const PRODUCTION_URL: &str = "https://my.gogetssl.com/api";
pub const SANDBOX_URL: &str = "https://sandbox.gogetssl.com/api";

/// Catalog categories, fetched one request each.
const CATEGORIES: &[&str] = &["ssl", "codesign", "smime"];

const STATUS_TABLE: &StatusTable = &[
    ("active", OrderStatus::Issued),
    ("new_order", OrderStatus::Pending),
    ("unpaid", OrderStatus::Pending),
    ("incomplete", OrderStatus::Pending),
    ("processing", OrderStatus::Processing),
    ("reissue", OrderStatus::Processing),
    ("revoking", OrderStatus::Processing),
    ("pending", OrderStatus::AwaitingValidation),
    ("revoked", OrderStatus::Revoked),
    ("cancelled", OrderStatus::Cancelled),
    ("canceled", OrderStatus::Cancelled),
    ("expired", OrderStatus::Expired),
    ("rejected", OrderStatus::Rejected),
];

pub const DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    slug: SLUG,
    display_name: DISPLAY_NAME,
    tier: ProviderTier::Full,
    credential_fields: &["username", "password"],
    statuses: STATUS_TABLE,
    extra_capabilities: &[Capability::Balance],
};

pub struct GoGetSslAdapter {
    client: VendorClient,
    base_url: String,
}

impl GoGetSslAdapter {
    pub fn new(
        base_url: impl Into<String>,
        username: String,
        password: Zeroizing<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let auth = SessionTokenAuth::new(
            DISPLAY_NAME,
            format!("{base_url}/auth/"),
            username,
            password,
            "auth_key",
        );
        Self {
            client: VendorClient::new(DISPLAY_NAME, transport, Box::new(auth)),
            base_url,
        }
    }

    pub fn from_credentials(
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProviderError> {
        let username = credentials.require(SLUG, "username")?;
        let password = credentials.require(SLUG, "password")?;
        let base_url = if credentials.flag("sandbox") {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        };
        Ok(Self::new(base_url, username.to_string(), password, transport))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> Result<Map<String, Value>, ProviderError> {
        let response = self.client.send(&HttpRequest::get(self.url(path)))?;
        decode(response)
    }

    fn post(&self, path: &str, fields: Vec<(String, String)>) -> Result<Map<String, Value>, ProviderError> {
        let response = self.client.send(&HttpRequest::post_form(self.url(path), fields))?;
        decode(response)
    }

    fn order_fields(request: &OrderRequest) -> Result<Vec<(String, String)>, ProviderError> {
        let common_name = request
            .common_name()
            .ok_or_else(|| ProviderError::OrderRejected("at least one domain is required".into()))?;
        let mut fields = vec![
            ("product_id".to_string(), request.product_code.clone()),
            ("period".to_string(), request.period_months.to_string()),
            ("csr".to_string(), request.csr.clone()),
            ("server_count".to_string(), "-1".to_string()),
            ("webserver_type".to_string(), "-1".to_string()),
            ("dcv_method".to_string(), dcv_method_value(request.dcv_method).to_string()),
        ];
        if let Some(email) = &request.approver_email {
            fields.push(("approver_email".to_string(), email.clone()));
        } else if request.dcv_method == DcvMethod::Email {
            fields.push(("approver_email".to_string(), format!("admin@{common_name}")));
        }
        if !request.san_domains().is_empty() {
            fields.push(("dns_names".to_string(), request.san_domains().join(",")));
        }
        if let Some(contact) = &request.admin_contact {
            fields.extend([
                ("admin_firstname".to_string(), contact.first_name.clone()),
                ("admin_lastname".to_string(), contact.last_name.clone()),
                ("admin_email".to_string(), contact.email.clone()),
                ("admin_phone".to_string(), contact.phone.clone()),
            ]);
            if let Some(organization) = &contact.organization {
                fields.push(("admin_organization".to_string(), organization.clone()));
            }
            if let Some(title) = &contact.title {
                fields.push(("admin_title".to_string(), title.clone()));
            }
        }
        Ok(fields)
    }

    fn parse_product(category: &str, raw: &Map<String, Value>) -> Option<CanonicalProduct> {
        let code = text(raw, "id")?;
        let name = first_text(raw, &["product", "name"]).unwrap_or_else(|| format!("Product {code}"));
        let validation_type = text(raw, "product_type")
            .and_then(|value| ValidationType::from_vendor(&value))
            .unwrap_or_else(|| ValidationType::infer_from_name(&name));
        let supports_wildcard = flag(raw, "wildcard_enabled");
        let supports_san = flag(raw, "multi_domains_enabled") || flag(raw, "san_enabled");
        let product_type = match category {
            "codesign" => ProductType::CodeSigning,
            "smime" => ProductType::Email,
            _ => ProductType::infer(&name, supports_wildcard, supports_san),
        };
        let price_table = table_from_period_maps(
            raw.get("prices").and_then(Value::as_object),
            raw.get("san_prices").and_then(Value::as_object),
            raw.get("wildcard_san_prices").and_then(Value::as_object),
            PeriodUnit::Years,
        );
        let max_years = number(raw, "max_period")
            .map(|months| months.div_ceil(12))
            .unwrap_or(1)
            .max(1);
        let mut vendor_extra = pick(raw, &["brand", "max_period", "multi_domains_maximum"]);
        vendor_extra.insert("category".to_string(), Value::String(category.to_string()));

        Some(
            CanonicalProduct {
                code,
                name,
                vendor: SLUG.to_string(),
                validation_type,
                product_type,
                supports_wildcard,
                supports_san,
                max_domains: number(raw, "multi_domains_maximum").unwrap_or(1).max(1),
                min_years: 1,
                max_years,
                price_table,
                vendor_extra,
            }
            .with_observed_periods(),
        )
    }
}

impl Provider for GoGetSslAdapter {
    fn slug(&self) -> &'static str {
        SLUG
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Full
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        DESCRIPTOR.capabilities()
    }

    fn test_connection(&self) -> ConnectionResult {
        match self.get_balance() {
            Ok(balance) => ConnectionResult::connected("connected to GoGetSSL", Some(balance)),
            Err(err) => {
                warn!("[gogetssl] connection test failed: {err}");
                ConnectionResult::failed(err.to_string())
            }
        }
    }

    fn fetch_products(&self) -> Result<Vec<CanonicalProduct>, ProviderError> {
        let mut products = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;
        for category in CATEGORIES {
            let body = match self.get(&format!("/products/{category}/")) {
                Ok(body) => body,
                Err(err) => {
                    warn!("[gogetssl] skipping category {category}: {err}");
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            succeeded += 1;
            let items = body.get("products").and_then(Value::as_array);
            for item in items.into_iter().flatten().filter_map(Value::as_object) {
                match Self::parse_product(category, item) {
                    Some(product) => products.push(product),
                    None => debug!("[gogetssl] ignoring product without id in {category}"),
                }
            }
        }
        if succeeded == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        info!("[gogetssl] fetched {} products", products.len());
        Ok(products)
    }

    fn fetch_pricing(&self, product_code: &str) -> Result<PriceTable, ProviderError> {
        let body = self.get(&format!("/products/price/{product_code}/"))?;
        let table = table_from_period_maps(
            body.get("prices").and_then(Value::as_object),
            body.get("san_prices").and_then(Value::as_object),
            body.get("wildcard_san_prices").and_then(Value::as_object),
            PeriodUnit::Years,
        );
        if table.base.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "GoGetSSL returned no prices for product {product_code}"
            )));
        }
        Ok(table)
    }

    fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ProviderError> {
        let fields = Self::order_fields(request)?;
        let body = self
            .post("/orders/add_ssl_order/", fields)
            .map_err(as_order_rejection)?;
        let remote_id = text(&body, "order_id").ok_or_else(|| {
            ProviderError::InvalidResponse("GoGetSSL order response has no order_id".into())
        })?;
        info!("[gogetssl] placed order {remote_id}");
        Ok(PlacedOrder {
            remote_id,
            status: text(&body, "order_status")
                .map(|raw| normalize_status(STATUS_TABLE, &raw))
                .unwrap_or(OrderStatus::Pending),
            vendor_extra: pick(&body, &["invoice_id", "order_amount", "currency"]),
        })
    }

    fn get_order_status(&self, remote_id: &str) -> Result<RemoteOrderStatus, ProviderError> {
        let body = self.get(&format!("/orders/status/{remote_id}/"))?;
        let mut domains: Vec<String> = text(&body, "domain").into_iter().collect();
        if let Some(Value::Array(sans)) = body.get("san") {
            for san in sans.iter().filter_map(Value::as_object) {
                if let Some(name) = text(san, "san_name") {
                    if !domains.contains(&name) {
                        domains.push(name);
                    }
                }
            }
        }
        Ok(RemoteOrderStatus {
            status: normalize_status(STATUS_TABLE, &text(&body, "status").unwrap_or_default()),
            certificate: text(&body, "crt_code"),
            ca_bundle: text(&body, "ca_code"),
            domains,
            begin_date: body.get("valid_from").and_then(parse_vendor_date_value),
            end_date: body.get("valid_till").and_then(parse_vendor_date_value),
            vendor_extra: pick(
                &body,
                &["partner_order_id", "product_id", "approver_method", "dcv_status", "total_domains"],
            ),
        })
    }

    fn download_certificate(&self, remote_id: &str) -> Result<ActionResult, ProviderError> {
        let status = self.get_order_status(remote_id)?;
        match status.certificate {
            Some(certificate) => Ok(ActionResult::with_certificate(CertificateBundle {
                certificate,
                ca_bundle: status.ca_bundle,
            })),
            None => Ok(ActionResult::refused(format!(
                "certificate not issued yet (status: {})",
                status.status.label()
            ))),
        }
    }

    fn reissue_certificate(
        &self,
        remote_id: &str,
        request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        let mut fields = vec![
            ("csr".to_string(), request.csr.clone()),
            ("dcv_method".to_string(), dcv_method_value(request.dcv_method).to_string()),
        ];
        if let Some(email) = &request.approver_email {
            fields.push(("approver_email".to_string(), email.clone()));
        }
        if !request.san_domains().is_empty() {
            fields.push(("dns_names".to_string(), request.san_domains().join(",")));
        }
        business_outcome(
            SLUG,
            self.post(&format!("/orders/ssl/reissue/{remote_id}/"), fields)
                .map(|_| ActionResult::done("reissue submitted")),
        )
    }

    fn renew_certificate(
        &self,
        _remote_id: &str,
        request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        let fields = Self::order_fields(request)?;
        let result = self.post("/orders/add_ssl_renew_order/", fields).and_then(|body| {
            let renewed = text(&body, "order_id").ok_or_else(|| {
                ProviderError::InvalidResponse("GoGetSSL renewal response has no order_id".into())
            })?;
            Ok(ActionResult::done("renewal order placed").with_remote_id(renewed))
        });
        business_outcome(SLUG, result)
    }

    fn revoke_certificate(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        let fields = vec![
            ("order_id".to_string(), remote_id.to_string()),
            ("reason".to_string(), reason.to_string()),
        ];
        business_outcome(
            SLUG,
            self.post("/orders/ssl/revoke/", fields)
                .map(|_| ActionResult::done("revocation requested")),
        )
    }

    fn cancel_order(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        let fields = vec![
            ("order_id".to_string(), remote_id.to_string()),
            ("reason".to_string(), reason.to_string()),
        ];
        business_outcome(
            SLUG,
            self.post("/orders/cancel_ssl_order/", fields)
                .map(|_| ActionResult::done("cancellation requested")),
        )
    }

    fn get_dcv_emails(&self, domain: &str) -> Result<Vec<String>, ProviderError> {
        let body = self.post(
            "/tools/domain/emails/",
            vec![("domain".to_string(), domain.to_string())],
        )?;
        let mut emails: Vec<String> = Vec::new();
        for key in ["ComodoApprovalEmails", "GeotrustApprovalEmails", "emails"] {
            for email in string_list(body.get(key)) {
                if !emails.contains(&email) {
                    emails.push(email);
                }
            }
        }
        Ok(emails)
    }

    fn resend_dcv_email(&self, remote_id: &str) -> Result<ActionResult, ProviderError> {
        business_outcome(
            SLUG,
            self.get(&format!("/orders/resend_validation_email/{remote_id}/"))
                .map(|_| ActionResult::done("validation email resent")),
        )
    }

    fn change_dcv_method(
        &self,
        remote_id: &str,
        domain: &str,
        method: DcvMethod,
        approver_email: Option<&str>,
    ) -> Result<ActionResult, ProviderError> {
        let new_method = match (method, approver_email) {
            (DcvMethod::Email, Some(email)) => email.to_string(),
            (DcvMethod::Email, None) => format!("admin@{domain}"),
            (other, _) => dcv_method_value(other).to_string(),
        };
        let fields = vec![
            ("domain".to_string(), domain.to_string()),
            ("new_method".to_string(), new_method),
        ];
        business_outcome(
            SLUG,
            self.post(&format!("/orders/ssl/change_validation_method/{remote_id}/"), fields)
                .map(|_| ActionResult::done(format!("validation method changed to {}", method.as_str()))),
        )
    }

    fn get_balance(&self) -> Result<Decimal, ProviderError> {
        let body = self.get("/account/balance/")?;
        text(&body, "balance")
            .and_then(|raw| Decimal::from_str(&raw.replace(',', "")).ok())
            .ok_or_else(|| ProviderError::InvalidResponse("GoGetSSL balance is missing".into()))
    }
}

fn dcv_method_value(method: DcvMethod) -> &'static str {
    match method {
        DcvMethod::Email => "email",
        DcvMethod::Http => "http",
        DcvMethod::Https => "https",
        DcvMethod::Cname => "dns",
    }
}

/// Checks HTTP status and the `{"error": true}` envelope.
fn decode(response: HttpResponse) -> Result<Map<String, Value>, ProviderError> {
    let body = response.object().cloned();
    let detail = body
        .as_ref()
        .and_then(|body| first_text(body, &["description", "message"]));
    if !response.is_success() {
        return Err(status_error(
            DISPLAY_NAME,
            response.status,
            detail.as_deref().or(Some(response.raw_body.as_str())),
        ));
    }
    let body = match body {
        Some(body) => body,
        None => response.require_object(DISPLAY_NAME)?.clone(),
    };
    if flag(&body, "error") {
        return Err(ProviderError::VendorRejected(
            detail.unwrap_or_else(|| "GoGetSSL reported an error".to_string()),
        ));
    }
    Ok(body)
}

fn as_order_rejection(err: ProviderError) -> ProviderError {
    match err {
        ProviderError::VendorRejected(reason) => ProviderError::OrderRejected(reason),
        other => other,
    }
}
