//! NicSRS reseller API adapter.
//!
//! Every call is a form POST carrying `api_token`; responses share the
//! `{"code", "msg", "data"}` envelope where 1 is success and 2 is "in progress".

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use zeroize::Zeroizing;

use crate::catalog::{CanonicalProduct, PriceTable, PriceTierKind, ProductType, ValidationType};
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, CertificateBundle, ConnectionResult, DcvMethod, OrderRequest, PlacedOrder,
    RemoteOrderStatus,
};
use crate::credentials::Credentials;
use crate::normalize::dates::parse_vendor_date_value;
use crate::normalize::pricing::{tier_from_suffix_codes, PeriodUnit};
use crate::normalize::status::{normalize_status, OrderStatus, StatusTable};

use super::auth::{FieldTokenAuth, VendorClient};
use super::http::{status_error, HttpRequest, HttpTransport};
use super::payload::{first_text, flag, number, pick, string_list, text, value_text};
use super::{business_outcome, Provider, ProviderTier, VendorDescriptor};

pub const SLUG: &str = "nicsrs";
const DISPLAY_NAME: &str = "NicSRS";

pub const PRODUCTION_URL: &str = "https://portal.nicsrs.com/ssl";

/// Catalog brands, fetched one request each.
const BRANDS: &[&str] = &["Sectigo", "DigiCert", "GlobalSign", "Positive"];

/// Price codes are `price` + a zero-padded period. Older listings count years
/// (`price002`), newer ones months (`price024`).
const PRICE_PREFIX: &str = "price";

const CODE_SUCCESS: i64 = 1;
const CODE_IN_PROGRESS: i64 = 2;

const STATUS_TABLE: &StatusTable = &[
    ("complete", OrderStatus::Issued),
    ("issued", OrderStatus::Issued),
    ("pending", OrderStatus::AwaitingValidation),
    ("dcv_pending", OrderStatus::AwaitingValidation),
    ("processing", OrderStatus::Processing),
    ("reissue", OrderStatus::Processing),
    ("renewing", OrderStatus::Processing),
    ("new", OrderStatus::Pending),
    ("revoked", OrderStatus::Revoked),
    ("cancelled", OrderStatus::Cancelled),
    ("refunded", OrderStatus::Cancelled),
    ("expired", OrderStatus::Expired),
    ("failed", OrderStatus::Rejected),
    ("rejected", OrderStatus::Rejected),
];

pub const DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    slug: SLUG,
    display_name: DISPLAY_NAME,
    tier: ProviderTier::Full,
    credential_fields: &["api_token"],
    statuses: STATUS_TABLE,
    extra_capabilities: &[],
};

/// Decoded `{"code", "msg", "data"}` envelope of a successful call.
struct Envelope {
    code: i64,
    message: String,
    data: Value,
}

impl Envelope {
    fn data_object(&self) -> Map<String, Value> {
        self.data.as_object().cloned().unwrap_or_default()
    }
}

pub struct NicSrsAdapter {
    client: VendorClient,
    base_url: String,
}

impl NicSrsAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Zeroizing<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            client: VendorClient::new(
                DISPLAY_NAME,
                transport,
                Box::new(FieldTokenAuth::single("api_token", api_token)),
            ),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_credentials(
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProviderError> {
        let api_token = credentials.require(SLUG, "api_token")?;
        let base_url = credentials.get("base_url").unwrap_or(PRODUCTION_URL).to_string();
        Ok(Self::new(base_url, api_token, transport))
    }

    fn call(&self, path: &str, fields: Vec<(String, String)>) -> Result<Envelope, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.send(&HttpRequest::post_form(url, fields))?;
        if !response.is_success() {
            return Err(status_error(DISPLAY_NAME, response.status, Some(&response.raw_body)));
        }
        let body = response.require_object(DISPLAY_NAME)?;
        let code = body.get("code").and_then(|code| match code {
            Value::Number(number) => number.as_i64(),
            Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        });
        let message = text(body, "msg").unwrap_or_default();
        match code {
            Some(code @ (CODE_SUCCESS | CODE_IN_PROGRESS)) => Ok(Envelope {
                code,
                message,
                data: body.get("data").cloned().unwrap_or(Value::Null),
            }),
            Some(code) => Err(envelope_error(code, message)),
            None => Err(ProviderError::InvalidResponse(
                "NicSRS response has no result code".into(),
            )),
        }
    }

    fn brand_products(&self, brand: &str) -> Result<Vec<CanonicalProduct>, ProviderError> {
        let envelope = self.call(
            "/productList",
            vec![("vendor".to_string(), brand.to_string())],
        )?;
        let items = envelope.data.as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|item| {
                let product = parse_product(brand, item);
                if product.is_none() {
                    debug!("[nicsrs] ignoring {brand} product without code");
                }
                product
            })
            .collect())
    }

    fn order_params(request: &OrderRequest) -> Result<String, ProviderError> {
        if request.domains.is_empty() {
            return Err(ProviderError::OrderRejected("at least one domain is required".into()));
        }
        let domain_info: Vec<Value> = request
            .domains
            .iter()
            .map(|domain| {
                json!({
                    "domainName": domain,
                    "dcvMethod": dcv_method_value(request.dcv_method),
                    "dcvEmail": request.approver_email.clone().unwrap_or_else(|| format!("admin@{domain}")),
                })
            })
            .collect();
        let mut params = json!({
            "csr": request.csr,
            "domainInfo": domain_info,
        });
        if let (Some(contact), Some(object)) = (&request.admin_contact, params.as_object_mut()) {
            object.insert(
                "Administrator".to_string(),
                json!({
                    "firstName": contact.first_name,
                    "lastName": contact.last_name,
                    "email": contact.email,
                    "mobile": contact.phone,
                    "organization": contact.organization,
                    "job": contact.title,
                }),
            );
        }
        Ok(params.to_string())
    }

    fn cert_action(
        &self,
        path: &str,
        remote_id: &str,
        extra: Vec<(String, String)>,
        message: &str,
    ) -> Result<ActionResult, ProviderError> {
        let mut fields = vec![("certId".to_string(), remote_id.to_string())];
        fields.extend(extra);
        business_outcome(
            SLUG,
            self.call(path, fields).map(|envelope| {
                if envelope.message.is_empty() {
                    ActionResult::done(message)
                } else {
                    ActionResult::done(format!("{message}: {}", envelope.message))
                }
            }),
        )
    }
}

impl Provider for NicSrsAdapter {
    fn slug(&self) -> &'static str {
        SLUG
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn tier(&self) -> ProviderTier {
        ProviderTier::Full
    }

    fn capabilities(&self) -> BTreeSet<super::Capability> {
        DESCRIPTOR.capabilities()
    }

    fn test_connection(&self) -> ConnectionResult {
        match self.brand_products("Positive") {
            Ok(products) => ConnectionResult::connected(
                format!("connected to NicSRS ({} products visible)", products.len()),
                None,
            ),
            Err(err) => {
                warn!("[nicsrs] connection test failed: {err}");
                ConnectionResult::failed(err.to_string())
            }
        }
    }

    fn fetch_products(&self) -> Result<Vec<CanonicalProduct>, ProviderError> {
        let mut products = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;
        for brand in BRANDS {
            match self.brand_products(brand) {
                Ok(mut items) => {
                    succeeded += 1;
                    products.append(&mut items);
                }
                Err(err) => {
                    warn!("[nicsrs] skipping brand {brand}: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        if succeeded == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        info!("[nicsrs] fetched {} products", products.len());
        Ok(products)
    }

    /// NicSRS has no per-product price call; the table comes from the brand listing.
    fn fetch_pricing(&self, product_code: &str) -> Result<PriceTable, ProviderError> {
        self.fetch_products()?
            .into_iter()
            .find(|product| product.code == product_code)
            .map(|product| product.price_table)
            .ok_or_else(|| ProviderError::NotFound(format!("NicSRS product {product_code}")))
    }

    fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ProviderError> {
        let fields = vec![
            ("productCode".to_string(), request.product_code.clone()),
            ("years".to_string(), request.period_years().to_string()),
            ("params".to_string(), Self::order_params(request)?),
        ];
        let envelope = self.call("/place", fields).map_err(|err| match err {
            ProviderError::VendorRejected(reason) => ProviderError::OrderRejected(reason),
            other => other,
        })?;
        let data = envelope.data_object();
        let remote_id = text(&data, "certId").ok_or_else(|| {
            ProviderError::InvalidResponse("NicSRS order response has no certId".into())
        })?;
        info!("[nicsrs] placed order {remote_id}");
        Ok(PlacedOrder {
            remote_id,
            status: OrderStatus::Pending,
            vendor_extra: pick(&data, &["vendorId", "vendorCertId"]),
        })
    }

    fn get_order_status(&self, remote_id: &str) -> Result<RemoteOrderStatus, ProviderError> {
        let envelope = self.call("/collect", vec![("certId".to_string(), remote_id.to_string())])?;
        let data = envelope.data_object();
        let certificate = text(&data, "certificate");
        let status = match text(&data, "status") {
            Some(raw) => normalize_status(STATUS_TABLE, &raw),
            None if certificate.is_some() => OrderStatus::Issued,
            None if envelope.code == CODE_IN_PROGRESS => OrderStatus::Processing,
            None => OrderStatus::Unknown("Unknown".to_string()),
        };
        let domains = data
            .get("dcvList")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|entry| text(entry, "domainName"))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RemoteOrderStatus {
            status,
            certificate,
            ca_bundle: first_text(&data, &["caCertificate", "intermediateCertificate"]),
            domains,
            begin_date: data.get("beginDate").and_then(parse_vendor_date_value),
            end_date: data.get("endDate").and_then(parse_vendor_date_value),
            vendor_extra: pick(&data, &["vendorId", "vendorCertId", "dcvList", "applyReturn"]),
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
        let params = Self::order_params(request)?;
        self.cert_action(
            "/reissue",
            remote_id,
            vec![("params".to_string(), params)],
            "reissue submitted",
        )
    }

    fn renew_certificate(
        &self,
        remote_id: &str,
        request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        let fields = vec![
            ("certId".to_string(), remote_id.to_string()),
            ("productCode".to_string(), request.product_code.clone()),
            ("years".to_string(), request.period_years().to_string()),
            ("params".to_string(), Self::order_params(request)?),
        ];
        let result = self.call("/renew", fields).and_then(|envelope| {
            let renewed = text(&envelope.data_object(), "certId").ok_or_else(|| {
                ProviderError::InvalidResponse("NicSRS renewal response has no certId".into())
            })?;
            Ok(ActionResult::done("renewal order placed").with_remote_id(renewed))
        });
        business_outcome(SLUG, result)
    }

    fn revoke_certificate(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        self.cert_action(
            "/revoke",
            remote_id,
            vec![("reason".to_string(), reason.to_string())],
            "revocation requested",
        )
    }

    fn cancel_order(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        self.cert_action(
            "/cancel",
            remote_id,
            vec![("reason".to_string(), reason.to_string())],
            "cancellation requested",
        )
    }

    fn get_dcv_emails(&self, domain: &str) -> Result<Vec<String>, ProviderError> {
        let envelope = self.call(
            "/DCVemail",
            vec![("domainName".to_string(), domain.to_string())],
        )?;
        let emails = match &envelope.data {
            Value::Object(data) => data
                .get("DCVEmails")
                .or_else(|| data.get("emails"))
                .map(|value| string_list(Some(value)))
                .unwrap_or_default(),
            other => string_list(Some(other)),
        };
        Ok(emails)
    }

    fn resend_dcv_email(&self, remote_id: &str) -> Result<ActionResult, ProviderError> {
        self.cert_action("/resendDCVEmail", remote_id, Vec::new(), "validation email resent")
    }

    fn change_dcv_method(
        &self,
        remote_id: &str,
        domain: &str,
        method: DcvMethod,
        approver_email: Option<&str>,
    ) -> Result<ActionResult, ProviderError> {
        let mut extra = vec![
            ("domainName".to_string(), domain.to_string()),
            ("dcvMethod".to_string(), dcv_method_value(method).to_string()),
        ];
        if method == DcvMethod::Email {
            let email = approver_email
                .map(str::to_string)
                .unwrap_or_else(|| format!("admin@{domain}"));
            extra.push(("dcvEmail".to_string(), email));
        }
        self.cert_action("/updateDCV", remote_id, extra, "validation method updated")
    }
}

fn parse_product(brand: &str, raw: &Map<String, Value>) -> Option<CanonicalProduct> {
    let code = first_text(raw, &["code", "productCode"])?;
    let name = first_text(raw, &["productName", "name"]).unwrap_or_else(|| code.clone());
    let validation_type = text(raw, "validationType")
        .and_then(|value| ValidationType::from_vendor(&value))
        .unwrap_or_else(|| ValidationType::infer_from_name(&name));
    let supports_wildcard = yes_no(raw, "supportWildcard");
    let supports_san = yes_no(raw, "supportSan");
    let product_type = ProductType::infer(&name, supports_wildcard, supports_san);

    let mut price_table = PriceTable::default();
    for (kind, key) in [
        (PriceTierKind::Base, "price"),
        (PriceTierKind::San, "sanPrice"),
        (PriceTierKind::WildcardSan, "wildcardSanPrice"),
    ] {
        if let Some(map) = raw.get(key).and_then(Value::as_object) {
            *price_table.tier_mut(kind) = tier_from_suffix_codes(map, PRICE_PREFIX, PeriodUnit::YearsOrMonths);
        }
    }
    let mut vendor_extra = pick(raw, &["maxDomain", "maxYear"]);
    vendor_extra.insert("brand".to_string(), Value::String(brand.to_string()));

    Some(
        CanonicalProduct {
            code,
            name,
            vendor: SLUG.to_string(),
            validation_type,
            product_type,
            supports_wildcard,
            supports_san,
            max_domains: number(raw, "maxDomain").unwrap_or(1).max(1),
            min_years: 1,
            max_years: number(raw, "maxYear").unwrap_or(1).max(1),
            price_table,
            vendor_extra,
        }
        .with_observed_periods(),
    )
}

/// NicSRS flags are `"Y"`/`"N"` strings, occasionally booleans.
fn yes_no(raw: &Map<String, Value>, key: &str) -> bool {
    match raw.get(key).and_then(value_text) {
        Some(value) => value.eq_ignore_ascii_case("y") || flag(raw, key),
        None => flag(raw, key),
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

fn envelope_error(code: i64, message: String) -> ProviderError {
    let message = if message.is_empty() {
        format!("NicSRS error code {code}")
    } else {
        message
    };
    if message.to_ascii_lowercase().contains("token") {
        ProviderError::AuthenticationFailure(format!("NicSRS authentication failed: {message}"))
    } else {
        ProviderError::VendorRejected(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::http::HttpResponse;
    use crate::providers::testing::ScriptedTransport;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn adapter(scripted: &Arc<ScriptedTransport>) -> NicSrsAdapter {
        NicSrsAdapter::new(
            "https://nicsrs.test/ssl",
            Zeroizing::new("tok".into()),
            scripted.clone(),
        )
    }

    #[test]
    fn suffix_codes_accept_years_and_months() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/productList",
            HttpResponse::json(
                200,
                json!({"code": 1, "msg": "", "data": [{
                    "code": "sectigo-ov",
                    "productName": "Sectigo OV SSL",
                    "validationType": "OV",
                    "supportWildcard": "N",
                    "supportSan": "Y",
                    "maxDomain": 250,
                    "maxYear": 2,
                    "price": {"price001": "40.00", "price002": "76.00"},
                    "sanPrice": {"price001": "12.00", "priceABC": "1.00"},
                    "wildcardSanPrice": {"price012": "90.00", "price024": "170.00"}
                }]}),
            ),
        );
        let table = provider.fetch_pricing("sectigo-ov").unwrap();
        assert_eq!(table.price(PriceTierKind::Base, 12), Decimal::from_str("40.00").ok());
        assert_eq!(table.price(PriceTierKind::Base, 24), Decimal::from_str("76.00").ok());
        assert_eq!(table.san.len(), 1);
        assert_eq!(table.price(PriceTierKind::WildcardSan, 12), Decimal::from_str("90.00").ok());
        assert_eq!(table.price(PriceTierKind::WildcardSan, 24), Decimal::from_str("170.00").ok());
        assert_eq!(table.price(PriceTierKind::WildcardSan, 144), None);

        let products = provider.fetch_products().unwrap();
        assert_eq!(products.len(), BRANDS.len());
        let product = &products[0];
        assert_eq!(product.validation_type, ValidationType::Ov);
        assert_eq!(product.product_type, ProductType::MultiDomain);
        assert_eq!(product.max_domains, 250);
        assert_eq!(scripted.requests()[0].form_value("api_token"), Some("tok"));
    }

    #[test]
    fn error_envelope_is_vendor_rejection() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/place",
            HttpResponse::json(200, json!({"code": -1, "msg": "CSR is invalid"})),
        );
        let request = OrderRequest {
            product_code: "positive-ssl".into(),
            csr: "x".into(),
            domains: vec!["example.com".into()],
            period_months: 12,
            ..Default::default()
        };
        let err = provider.place_order(&request).unwrap_err();
        assert_eq!(err, ProviderError::OrderRejected("CSR is invalid".into()));
    }

    #[test]
    fn invalid_token_is_authentication_failure() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/productList",
            HttpResponse::json(200, json!({"code": -2, "msg": "api_token is invalid"})),
        );
        let result = provider.test_connection();
        assert!(!result.ok);
        assert!(result.message.contains("authentication failed"));
    }

    #[test]
    fn in_progress_collect_is_processing() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/collect",
            HttpResponse::json(
                200,
                json!({"code": 2, "msg": "processing", "data": {
                    "dcvList": [{"domainName": "example.com"}],
                    "beginDate": "",
                    "endDate": "2025-06-01 00:00:00"
                }}),
            ),
        );
        let status = provider.get_order_status("C-1").unwrap();
        assert_eq!(status.status, OrderStatus::Processing);
        assert_eq!(status.domains, vec!["example.com"]);
        assert_eq!(status.begin_date, None);
        assert!(status.end_date.is_some());

        let download = provider.download_certificate("C-1").unwrap();
        assert!(!download.success);
    }

    #[test]
    fn place_order_encodes_years_and_params() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/place",
            HttpResponse::json(200, json!({"code": 1, "data": {"certId": "CERT-9", "vendorId": "V1"}})),
        );
        let request = OrderRequest {
            product_code: "positive-ssl".into(),
            csr: "CSR".into(),
            domains: vec!["example.com".into()],
            period_months: 24,
            dcv_method: DcvMethod::Http,
            ..Default::default()
        };
        let placed = provider.place_order(&request).unwrap();
        assert_eq!(placed.remote_id, "CERT-9");

        let sent = scripted.requests().pop().unwrap();
        assert_eq!(sent.form_value("years"), Some("2"));
        let params: Value = serde_json::from_str(sent.form_value("params").unwrap()).unwrap();
        assert_eq!(params["domainInfo"][0]["dcvMethod"], json!("HTTP_CSR_HASH"));
    }

    #[test]
    fn revoke_refusal_is_unsuccessful_action() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        scripted.respond(
            "/revoke",
            HttpResponse::json(200, json!({"code": 0, "msg": "certificate not issued"})),
        );
        let result = provider.revoke_certificate("C-1", "keyCompromise").unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "certificate not issued");
    }

    #[test]
    fn balance_is_unsupported() {
        let scripted = Arc::new(ScriptedTransport::new());
        let provider = adapter(&scripted);
        assert!(provider.get_balance().unwrap_err().is_expected());
    }
}
