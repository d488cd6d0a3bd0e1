//! Sectigo direct-reseller adapter (limited tier).
//!
//! The account has no catalog or lifecycle endpoints beyond ordering and DCV,
//! so products come from a static list and prices are discovered with one
//! `GetCostOfCertificate` call per product and candidate period.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::catalog::{CanonicalProduct, PriceTable, PriceTierKind, ProductType, ValidationType};
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, ConnectionResult, DcvMethod, OrderRequest, PlacedOrder, RemoteOrderStatus,
};
use crate::credentials::Credentials;
use crate::normalize::dates::parse_vendor_date_value;
use crate::normalize::pricing::{parse_price, PeriodUnit};
use crate::normalize::status::{normalize_status, OrderStatus, StatusTable};

use super::auth::{FieldTokenAuth, VendorClient};
use super::http::{status_error, HttpRequest, HttpTransport};
use super::payload::{first_text, pick, string_list, text};
use super::{business_outcome, Capability, Provider, ProviderTier, VendorDescriptor};

pub const SLUG: &str = "sectigo";
const DISPLAY_NAME: &str = "Sectigo";

pub const PRODUCTION_URL: &str = "https://secure.trust-provider.com/products";

/// Candidate validity periods probed for every product, in years.
pub const CANDIDATE_YEARS: [u32; 3] = [1, 2, 3];

/// `errorCode` values that mean the login itself was refused.
const AUTH_ERROR_CODES: &[i64] = &[-15, -16];

const STATUS_TABLE: &StatusTable = &[
    ("valid", OrderStatus::Issued),
    ("issued", OrderStatus::Issued),
    ("awaiting validation", OrderStatus::AwaitingValidation),
    ("awaiting_validation", OrderStatus::AwaitingValidation),
    ("being processed", OrderStatus::Processing),
    ("processing", OrderStatus::Processing),
    ("on hold", OrderStatus::Processing),
    ("revoked", OrderStatus::Revoked),
    ("rejected", OrderStatus::Rejected),
    ("expired", OrderStatus::Expired),
];

pub const DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    slug: SLUG,
    display_name: DISPLAY_NAME,
    tier: ProviderTier::Limited,
    credential_fields: &["login_name", "login_password"],
    statuses: STATUS_TABLE,
    extra_capabilities: &[],
};

/// One entry of the static product list.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub code: &'static str,
    pub name: &'static str,
    pub validation_type: ValidationType,
    pub supports_wildcard: bool,
    pub supports_san: bool,
    pub max_domains: u32,
}

pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        code: "287",
        name: "PositiveSSL",
        validation_type: ValidationType::Dv,
        supports_wildcard: false,
        supports_san: false,
        max_domains: 1,
    },
    CatalogEntry {
        code: "289",
        name: "PositiveSSL Wildcard",
        validation_type: ValidationType::Dv,
        supports_wildcard: true,
        supports_san: false,
        max_domains: 1,
    },
    CatalogEntry {
        code: "279",
        name: "PositiveSSL Multi-Domain",
        validation_type: ValidationType::Dv,
        supports_wildcard: false,
        supports_san: true,
        max_domains: 250,
    },
    CatalogEntry {
        code: "24",
        name: "Sectigo OV SSL",
        validation_type: ValidationType::Ov,
        supports_wildcard: false,
        supports_san: false,
        max_domains: 1,
    },
    CatalogEntry {
        code: "337",
        name: "Sectigo EV SSL",
        validation_type: ValidationType::Ev,
        supports_wildcard: false,
        supports_san: false,
        max_domains: 1,
    },
];

pub struct SectigoAdapter {
    client: VendorClient,
    base_url: String,
    catalog: &'static [CatalogEntry],
}

impl SectigoAdapter {
    pub fn new(
        base_url: impl Into<String>,
        login_name: Zeroizing<String>,
        login_password: Zeroizing<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let auth = FieldTokenAuth::new(vec![
            ("loginName".to_string(), login_name),
            ("loginPassword".to_string(), login_password),
        ]);
        Self {
            client: VendorClient::new(DISPLAY_NAME, transport, Box::new(auth)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            catalog: CATALOG,
        }
    }

    pub fn from_credentials(
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProviderError> {
        let login_name = credentials.require(SLUG, "login_name")?;
        let login_password = credentials.require(SLUG, "login_password")?;
        let base_url = credentials.get("base_url").unwrap_or(PRODUCTION_URL).to_string();
        Ok(Self::new(base_url, login_name, login_password, transport))
    }

    /// Restricts the static list, mostly useful for targeted pricing runs.
    pub fn with_catalog(mut self, catalog: &'static [CatalogEntry]) -> Self {
        self.catalog = catalog;
        self
    }

    fn call(&self, path: &str, fields: Vec<(String, String)>) -> Result<Map<String, Value>, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.send(&HttpRequest::post_form(url, fields))?;
        if !response.is_success() {
            return Err(status_error(DISPLAY_NAME, response.status, Some(&response.raw_body)));
        }
        let body = response.require_object(DISPLAY_NAME)?.clone();
        let code = error_code(&body);
        if code < 0 {
            let message = text(&body, "errorMessage")
                .unwrap_or_else(|| format!("Sectigo error code {code}"));
            if AUTH_ERROR_CODES.contains(&code) {
                return Err(ProviderError::AuthenticationFailure(format!(
                    "Sectigo authentication failed: {message}"
                )));
            }
            return Err(ProviderError::VendorRejected(message));
        }
        Ok(body)
    }

    fn cost(&self, product_code: &str, years: u32) -> Result<Decimal, ProviderError> {
        let body = self.call(
            "/!GetCostOfCertificate",
            vec![
                ("product".to_string(), product_code.to_string()),
                ("years".to_string(), years.to_string()),
            ],
        )?;
        body.get("cost")
            .and_then(parse_price)
            .ok_or_else(|| ProviderError::VendorRejected(format!("no usable cost for {years} year(s)")))
    }

    /// Probes every candidate period. Only authentication failures abort;
    /// any other per-period failure means the period is not offered.
    fn probe_prices(&self, product_code: &str) -> Result<PriceTable, ProviderError> {
        let mut table = PriceTable::default();
        for years in CANDIDATE_YEARS {
            match self.cost(product_code, years) {
                Ok(price) => {
                    if let Some(months) = PeriodUnit::Years.to_months(years) {
                        table.insert(PriceTierKind::Base, months, price);
                    }
                }
                Err(err @ ProviderError::AuthenticationFailure(_)) => return Err(err),
                Err(err) => {
                    debug!("[sectigo] product {product_code} not offered for {years}y: {err}");
                }
            }
        }
        Ok(table)
    }

    fn order_fields(request: &OrderRequest) -> Result<Vec<(String, String)>, ProviderError> {
        let common_name = request
            .common_name()
            .ok_or_else(|| ProviderError::OrderRejected("at least one domain is required".into()))?;
        let mut fields = vec![
            ("product".to_string(), request.product_code.clone()),
            ("years".to_string(), request.period_years().to_string()),
            ("csr".to_string(), request.csr.clone()),
            ("serverSoftware".to_string(), "-1".to_string()),
            ("isCustomerValidated".to_string(), "N".to_string()),
            ("showCertificateID".to_string(), "Y".to_string()),
        ];
        match request.dcv_method {
            DcvMethod::Email => {
                let email = request
                    .approver_email
                    .clone()
                    .unwrap_or_else(|| format!("admin@{common_name}"));
                fields.push(("dcvEmailAddress".to_string(), email));
            }
            other => fields.push(("dcvMethod".to_string(), dcv_method_value(other).to_string())),
        }
        if !request.san_domains().is_empty() {
            fields.push(("domainNames".to_string(), request.domains.join(",")));
        }
        if let Some(contact) = &request.admin_contact {
            fields.extend([
                ("firstName".to_string(), contact.first_name.clone()),
                ("lastName".to_string(), contact.last_name.clone()),
                ("emailAddress".to_string(), contact.email.clone()),
                ("telephoneNumber".to_string(), contact.phone.clone()),
            ]);
        }
        Ok(fields)
    }
}

impl Provider for SectigoAdapter {
    fn slug(&self) -> &'static str {
        SLUG
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Limited
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        DESCRIPTOR.capabilities()
    }

    fn test_connection(&self) -> ConnectionResult {
        let Some(entry) = self.catalog.first() else {
            return ConnectionResult::failed("no Sectigo products configured");
        };
        match self.cost(entry.code, 1) {
            Ok(_) => ConnectionResult::connected("connected to Sectigo", None),
            Err(err @ (ProviderError::AuthenticationFailure(_) | ProviderError::TransportFailure(_))) => {
                warn!("[sectigo] connection test failed: {err}");
                ConnectionResult::failed(err.to_string())
            }
            // Credentials were accepted even if this product is not priced.
            Err(err) => ConnectionResult::connected(format!("connected to Sectigo ({err})"), None),
        }
    }

    fn fetch_products(&self) -> Result<Vec<CanonicalProduct>, ProviderError> {
        let mut products = Vec::new();
        for entry in self.catalog {
            let price_table = self.probe_prices(entry.code)?;
            let (Some(min_years), Some(max_years)) = (price_table.min_years(), price_table.max_years())
            else {
                info!("[sectigo] skipping {} ({}): no period offered", entry.name, entry.code);
                continue;
            };
            let mut vendor_extra = Map::new();
            vendor_extra.insert("catalog".to_string(), Value::String("static".to_string()));
            products.push(CanonicalProduct {
                code: entry.code.to_string(),
                name: entry.name.to_string(),
                vendor: SLUG.to_string(),
                validation_type: entry.validation_type,
                product_type: ProductType::infer(entry.name, entry.supports_wildcard, entry.supports_san),
                supports_wildcard: entry.supports_wildcard,
                supports_san: entry.supports_san,
                max_domains: entry.max_domains,
                min_years,
                max_years,
                price_table,
                vendor_extra,
            });
        }
        info!("[sectigo] priced {} of {} catalog products", products.len(), self.catalog.len());
        Ok(products)
    }

    fn fetch_pricing(&self, product_code: &str) -> Result<PriceTable, ProviderError> {
        let table = self.probe_prices(product_code)?;
        if table.base.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "Sectigo offers no period for product {product_code}"
            )));
        }
        Ok(table)
    }

    fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ProviderError> {
        let fields = Self::order_fields(request)?;
        let body = self.call("/!AutoApplySSL", fields).map_err(|err| match err {
            ProviderError::VendorRejected(reason) => ProviderError::OrderRejected(reason),
            other => other,
        })?;
        let remote_id = text(&body, "orderNumber").ok_or_else(|| {
            ProviderError::InvalidResponse("Sectigo order response has no orderNumber".into())
        })?;
        info!("[sectigo] placed order {remote_id}");
        Ok(PlacedOrder {
            remote_id,
            status: OrderStatus::AwaitingValidation,
            vendor_extra: pick(&body, &["certificateID", "expectedDeliveryTime", "totalCost"]),
        })
    }

    fn get_order_status(&self, remote_id: &str) -> Result<RemoteOrderStatus, ProviderError> {
        let body = self.call(
            "/!CollectSSL",
            vec![
                ("orderNumber".to_string(), remote_id.to_string()),
                ("queryType".to_string(), "0".to_string()),
                ("responseFormat".to_string(), "json".to_string()),
            ],
        )?;
        let status = match first_text(&body, &["status", "certificateStatus"]) {
            Some(raw) => normalize_status(STATUS_TABLE, &raw),
            None => match error_code(&body) {
                2 => OrderStatus::Issued,
                1 => OrderStatus::Processing,
                _ => OrderStatus::AwaitingValidation,
            },
        };
        Ok(RemoteOrderStatus {
            status,
            certificate: text(&body, "certificate"),
            ca_bundle: text(&body, "caCertificate"),
            domains: string_list(body.get("domainNames")),
            begin_date: body.get("notBefore").and_then(parse_vendor_date_value),
            end_date: body.get("notAfter").and_then(parse_vendor_date_value),
            vendor_extra: pick(&body, &["certificateID", "dcvStatus", "validationStatus"]),
        })
    }

    fn get_dcv_emails(&self, domain: &str) -> Result<Vec<String>, ProviderError> {
        let body = self.call(
            "/!GetDCVEmailAddressList",
            vec![("domainName".to_string(), domain.to_string())],
        )?;
        let mut emails: Vec<String> = Vec::new();
        for key in ["whoisEmail", "level2Emails", "level3Emails", "emails"] {
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
            self.call(
                "/!ResendDCVEmail",
                vec![("orderNumber".to_string(), remote_id.to_string())],
            )
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
        let mut fields = vec![
            ("orderNumber".to_string(), remote_id.to_string()),
            ("domainName".to_string(), domain.to_string()),
            ("newMethod".to_string(), dcv_method_value(method).to_string()),
        ];
        if method == DcvMethod::Email {
            let email = approver_email
                .map(str::to_string)
                .unwrap_or_else(|| format!("admin@{domain}"));
            fields.push(("newDCVEmailAddress".to_string(), email));
        }
        business_outcome(
            SLUG,
            self.call("/!AutoUpdateDCV", fields)
                .map(|_| ActionResult::done(format!("validation method changed to {}", method.as_str()))),
        )
    }
}

fn error_code(body: &Map<String, Value>) -> i64 {
    match body.get("errorCode") {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(0),
        Some(Value::String(raw)) => i64::from_str(raw.trim()).unwrap_or(0),
        _ => 0,
    }
}

fn dcv_method_value(method: DcvMethod) -> &'static str {
    match method {
        DcvMethod::Email => "EMAIL",
        DcvMethod::Http => "HTTP_CSR_HASH",
        DcvMethod::Https => "HTTPS_CSR_HASH",
        DcvMethod::Cname => "CNAME_CSR_HASH",
    }
}
