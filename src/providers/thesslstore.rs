//! TheSSLStore REST API adapter.
//!
//! Every call is a JSON POST with an embedded `AuthRequest`. Failures come back
//! as HTTP 200 with `AuthResponse.isError` set, either on the top-level object
//! or on each element of an array response.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{info, warn};
use serde_json::{json, Map, Value};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::catalog::{CanonicalProduct, PriceTable, PriceTierKind, ProductType, ValidationType};
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, CertificateBundle, ConnectionResult, DcvMethod, OrderRequest, PlacedOrder,
    RemoteOrderStatus,
};
use crate::credentials::Credentials;
use crate::normalize::dates::parse_vendor_date_value;
use crate::normalize::pricing::{tier_from_entries, PeriodUnit};
use crate::normalize::status::{normalize_status, OrderStatus, StatusTable};

use super::auth::{EmbeddedJsonAuth, VendorClient};
use super::http::{status_error, HttpRequest, HttpTransport};
use super::payload::{first_text, flag, number, pick, string_list, text, value_text};
use super::{business_outcome, Capability, Provider, ProviderTier, VendorDescriptor};

pub const SLUG: &str = "thesslstore";
const DISPLAY_NAME: &str = "TheSSLStore";

pub const PRODUCTION_URL: &str = "https://api.thesslstore.com/rest";
pub const SANDBOX_URL: &str = "https://sandbox-wbapi.thesslstore.com/rest";

/// `ProductType` filter values queried for the catalog: DV, EV, OV, wildcard, SAN.
const PRODUCT_TYPES: &[u32] = &[1, 2, 3, 4, 7];

const STATUS_TABLE: &StatusTable = &[
    ("initial", OrderStatus::Pending),
    ("pending", OrderStatus::AwaitingValidation),
    ("active", OrderStatus::Issued),
    ("pending_reissue", OrderStatus::Processing),
    ("reissue", OrderStatus::Processing),
    ("cancelled", OrderStatus::Cancelled),
    ("refunded", OrderStatus::Cancelled),
    ("rejected", OrderStatus::Rejected),
    ("revoked", OrderStatus::Revoked),
    ("expired", OrderStatus::Expired),
];

pub const DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    slug: SLUG,
    display_name: DISPLAY_NAME,
    tier: ProviderTier::Full,
    credential_fields: &["partner_code", "auth_token"],
    statuses: STATUS_TABLE,
    extra_capabilities: &[Capability::ConfigLink],
};

pub struct TheSslStoreAdapter {
    client: VendorClient,
    base_url: String,
}

impl TheSslStoreAdapter {
    pub fn new(
        base_url: impl Into<String>,
        partner_code: String,
        auth_token: Zeroizing<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            client: VendorClient::new(
                DISPLAY_NAME,
                transport,
                Box::new(EmbeddedJsonAuth::new(partner_code, auth_token)),
            ),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_credentials(
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProviderError> {
        let partner_code = credentials.require(SLUG, "partner_code")?;
        let auth_token = credentials.require(SLUG, "auth_token")?;
        let base_url = if credentials.flag("sandbox") {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        };
        Ok(Self::new(base_url, partner_code.to_string(), auth_token, transport))
    }

    fn call(&self, path: &str, payload: Value) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.send(&HttpRequest::post_json(url, payload))?;
        if !response.is_success() {
            return Err(status_error(DISPLAY_NAME, response.status, Some(&response.raw_body)));
        }
        let body = response.decoded_body.clone().ok_or_else(|| {
            ProviderError::InvalidResponse("TheSSLStore returned a non-JSON body".into())
        })?;
        if has_error(&body) {
            return Err(classify_error(extract_error(&body)));
        }
        Ok(body)
    }

    fn call_object(&self, path: &str, payload: Value) -> Result<Map<String, Value>, ProviderError> {
        match self.call(path, payload)? {
            Value::Object(map) => Ok(map),
            Value::Array(mut items) if !items.is_empty() => match items.swap_remove(0) {
                Value::Object(map) => Ok(map),
                _ => Err(ProviderError::InvalidResponse(format!("unexpected {path} response"))),
            },
            _ => Err(ProviderError::InvalidResponse(format!("unexpected {path} response"))),
        }
    }

    fn order_payload(request: &OrderRequest) -> Result<Value, ProviderError> {
        let common_name = request
            .common_name()
            .ok_or_else(|| ProviderError::OrderRejected("at least one domain is required".into()))?;
        let mut payload = json!({
            "CustomOrderID": Uuid::new_v4().to_string(),
            "ProductCode": request.product_code,
            "ValidityPeriod": request.period_months,
            "ServerCount": -1,
            "CSR": request.csr,
            "DomainName": common_name,
            "DNSNames": request.san_domains(),
            "WebServerType": "Other",
            "SignatureHashAlgorithm": "SHA2-256",
            "isCUOrder": false,
            "isRenewalOrder": false,
            "isTrialOrder": false,
        });
        if let Some(object) = payload.as_object_mut() {
            object.extend(dcv_fields(request.dcv_method));
            if let Some(email) = &request.approver_email {
                object.insert("ApproverEmail".to_string(), json!(email));
            }
            if let Some(contact) = &request.admin_contact {
                object.insert(
                    "AdminContact".to_string(),
                    json!({
                        "FirstName": contact.first_name,
                        "LastName": contact.last_name,
                        "Email": contact.email,
                        "Phone": contact.phone,
                        "OrganizationName": contact.organization,
                        "Title": contact.title,
                    }),
                );
            }
        }
        Ok(payload)
    }

    fn order_ref(remote_id: &str) -> Value {
        json!({ "TheSSLStoreOrderID": remote_id })
    }

    fn status_body(&self, remote_id: &str) -> Result<Map<String, Value>, ProviderError> {
        self.call_object("/order/status/", Self::order_ref(remote_id))
    }
}

impl Provider for TheSslStoreAdapter {
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
        match self.call("/health/validate/", json!({})) {
            Ok(_) => ConnectionResult::connected("connected to TheSSLStore", None),
            Err(err) => {
                warn!("[thesslstore] connection test failed: {err}");
                ConnectionResult::failed(err.to_string())
            }
        }
    }

    fn fetch_products(&self) -> Result<Vec<CanonicalProduct>, ProviderError> {
        let mut products: Vec<CanonicalProduct> = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;
        for product_type in PRODUCT_TYPES {
            let body = match self.call("/product/query/", json!({ "ProductType": product_type })) {
                Ok(body) => body,
                Err(err) => {
                    warn!("[thesslstore] skipping product type {product_type}: {err}");
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            succeeded += 1;
            let items = body.as_array().cloned().unwrap_or_default();
            for product in items.iter().filter_map(Value::as_object).filter_map(parse_product) {
                if !products.iter().any(|existing| existing.code == product.code) {
                    products.push(product);
                }
            }
        }
        if succeeded == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        info!("[thesslstore] fetched {} products", products.len());
        Ok(products)
    }

    fn fetch_pricing(&self, product_code: &str) -> Result<PriceTable, ProviderError> {
        let body = self.call("/product/query/", json!({ "ProductCode": product_code }))?;
        body.as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .filter(|item| text(item, "ProductCode").as_deref() == Some(product_code))
            .find_map(|item| {
                let table = price_table(item);
                (!table.base.is_empty()).then_some(table)
            })
            .ok_or_else(|| ProviderError::NotFound(format!("TheSSLStore product {product_code}")))
    }

    fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ProviderError> {
        let payload = Self::order_payload(request)?;
        let custom_order_id = payload.get("CustomOrderID").cloned();
        let body = self
            .call_object("/order/neworder/", payload)
            .map_err(|err| match err {
                ProviderError::VendorRejected(reason) => ProviderError::OrderRejected(reason),
                other => other,
            })?;
        let remote_id = text(&body, "TheSSLStoreOrderID").ok_or_else(|| {
            ProviderError::InvalidResponse("TheSSLStore order response has no order id".into())
        })?;
        let mut vendor_extra = pick(&body, &["VendorOrderID", "TinyOrderLink"]);
        if let Some(custom) = custom_order_id {
            vendor_extra.insert("CustomOrderID".to_string(), custom);
        }
        info!("[thesslstore] placed order {remote_id}");
        Ok(PlacedOrder {
            remote_id,
            status: major_status(&body).unwrap_or(OrderStatus::Pending),
            vendor_extra,
        })
    }

    fn get_order_status(&self, remote_id: &str) -> Result<RemoteOrderStatus, ProviderError> {
        let body = self.status_body(remote_id)?;
        let mut domains: Vec<String> = text(&body, "CommonName").into_iter().collect();
        for name in string_list(body.get("DNSNames")) {
            if !domains.contains(&name) {
                domains.push(name);
            }
        }
        Ok(RemoteOrderStatus {
            status: major_status(&body).unwrap_or(OrderStatus::Unknown("Unknown".to_string())),
            certificate: None,
            ca_bundle: None,
            domains,
            begin_date: body.get("CertificateStartDate").and_then(parse_vendor_date_value),
            end_date: body.get("CertificateEndDate").and_then(parse_vendor_date_value),
            vendor_extra: pick(
                &body,
                &["VendorOrderID", "CustomOrderID", "TinyOrderLink", "ApproverEmail", "ProductCode"],
            ),
        })
    }

    fn download_certificate(&self, remote_id: &str) -> Result<ActionResult, ProviderError> {
        let result = self
            .call_object("/order/download/", Self::order_ref(remote_id))
            .map(|body| {
                let files = body.get("Certificates").and_then(Value::as_array);
                let mut certificate = None;
                let mut chain = Vec::new();
                for file in files.into_iter().flatten().filter_map(Value::as_object) {
                    let Some(content) = text(file, "FileContent") else {
                        continue;
                    };
                    let name = text(file, "FileName").unwrap_or_default().to_ascii_lowercase();
                    let is_chain = ["ca.", "ca_", "_ca", "intermediate", "root", "bundle", "chain"]
                        .iter()
                        .any(|marker| name.contains(marker));
                    if certificate.is_none() && !is_chain {
                        certificate = Some(content);
                    } else {
                        chain.push(content);
                    }
                }
                match certificate {
                    Some(certificate) => ActionResult::with_certificate(CertificateBundle {
                        certificate,
                        ca_bundle: (!chain.is_empty()).then(|| chain.join("\n")),
                    }),
                    None => ActionResult::refused("certificate not issued yet"),
                }
            });
        business_outcome(SLUG, result)
    }

    fn reissue_certificate(
        &self,
        remote_id: &str,
        request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        let mut payload = json!({
            "TheSSLStoreOrderID": remote_id,
            "CSR": request.csr,
            "WebServerType": "Other",
            "DNSNames": request.san_domains(),
            "isWildCard": request.common_name().is_some_and(|name| name.starts_with("*.")),
            "SignatureHashAlgorithm": "SHA2-256",
        });
        if let Some(object) = payload.as_object_mut() {
            object.extend(dcv_fields(request.dcv_method));
            if let Some(email) = &request.approver_email {
                object.insert("ApproverEmails".to_string(), json!(email));
            }
        }
        business_outcome(
            SLUG,
            self.call_object("/order/reissue/", payload)
                .map(|_| ActionResult::done("reissue submitted")),
        )
    }

    fn renew_certificate(
        &self,
        remote_id: &str,
        request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        let mut payload = Self::order_payload(request)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("isRenewalOrder".to_string(), json!(true));
            object.insert("RelatedTheSSLStoreOrderID".to_string(), json!(remote_id));
        }
        let result = self.call_object("/order/neworder/", payload).and_then(|body| {
            let renewed = text(&body, "TheSSLStoreOrderID").ok_or_else(|| {
                ProviderError::InvalidResponse("TheSSLStore renewal response has no order id".into())
            })?;
            Ok(ActionResult::done("renewal order placed").with_remote_id(renewed))
        });
        business_outcome(SLUG, result)
    }

    fn revoke_certificate(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        let payload = json!({ "TheSSLStoreOrderID": remote_id, "RevokeReason": reason });
        business_outcome(
            SLUG,
            self.call_object("/order/certificaterevokerequest/", payload)
                .map(|_| ActionResult::done("revocation requested")),
        )
    }

    fn cancel_order(&self, remote_id: &str, reason: &str) -> Result<ActionResult, ProviderError> {
        let payload = json!({ "TheSSLStoreOrderID": remote_id, "RefundReason": reason });
        business_outcome(
            SLUG,
            self.call_object("/order/refundrequest/", payload)
                .map(|_| ActionResult::done("refund requested")),
        )
    }

    fn get_dcv_emails(&self, domain: &str) -> Result<Vec<String>, ProviderError> {
        let body = self.call("/order/approverlist/", json!({ "DomainName": domain }))?;
        let emails = match &body {
            Value::Object(map) => string_list(map.get("ApproverEmailList")),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(map) => first_text(map, &["ApproverEmail", "EmailAddress"]),
                    other => value_text(other),
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(emails)
    }

    fn resend_dcv_email(&self, remote_id: &str) -> Result<ActionResult, ProviderError> {
        let payload = json!({ "TheSSLStoreOrderID": remote_id, "ResendEmailType": "ApproverEmail" });
        business_outcome(
            SLUG,
            self.call_object("/order/resend/", payload)
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
        let mut payload = json!({
            "TheSSLStoreOrderID": remote_id,
            "DomainNames": domain,
            "DCVMethod": match method {
                DcvMethod::Email => "EMAIL",
                DcvMethod::Http => "HTTP",
                DcvMethod::Https => "HTTPS",
                DcvMethod::Cname => "CNAME",
            },
        });
        if let (DcvMethod::Email, Some(object)) = (method, payload.as_object_mut()) {
            let email = approver_email
                .map(str::to_string)
                .unwrap_or_else(|| format!("admin@{domain}"));
            object.insert("ResendEmail".to_string(), json!(email));
        }
        business_outcome(
            SLUG,
            self.call_object("/order/changeapprovermethod/", payload)
                .map(|_| ActionResult::done(format!("validation method changed to {}", method.as_str()))),
        )
    }

    fn config_link(&self, remote_id: &str) -> Result<String, ProviderError> {
        let body = self.status_body(remote_id)?;
        text(&body, "TinyOrderLink").ok_or_else(|| {
            ProviderError::NotFound(format!("TheSSLStore order {remote_id} has no configuration link"))
        })
    }
}

/// Whether any `AuthResponse` in the body (object or array) reports an error.
pub fn has_error(body: &Value) -> bool {
    match body {
        Value::Object(map) => {
            map.get("AuthResponse")
                .and_then(Value::as_object)
                .is_some_and(|auth| flag(auth, "isError"))
                || flag(map, "isError")
        }
        Value::Array(items) => items.iter().any(has_error),
        _ => false,
    }
}

/// Joins every `Message` entry of the erroring `AuthResponse` objects.
pub fn extract_error(body: &Value) -> String {
    let mut messages = Vec::new();
    collect_messages(body, &mut messages);
    if messages.is_empty() {
        "TheSSLStore reported an error".to_string()
    } else {
        messages.join("; ")
    }
}

fn collect_messages(body: &Value, out: &mut Vec<String>) {
    match body {
        Value::Object(map) => {
            let source = map.get("AuthResponse").and_then(Value::as_object).unwrap_or(map);
            if flag(source, "isError") || flag(map, "isError") {
                out.extend(string_list(source.get("Message")));
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        _ => {}
    }
}

fn classify_error(message: String) -> ProviderError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("auth token")
        || lowered.contains("authtoken")
        || lowered.contains("partner code")
        || lowered.contains("partnercode")
        || lowered.contains("authentication")
    {
        ProviderError::AuthenticationFailure(format!("TheSSLStore authentication failed: {message}"))
    } else {
        ProviderError::VendorRejected(message)
    }
}

fn major_status(body: &Map<String, Value>) -> Option<OrderStatus> {
    let status = body.get("OrderStatus")?;
    let raw = match status {
        Value::Object(inner) => first_text(inner, &["MajorStatus", "MinorStatus"])?,
        other => value_text(other)?,
    };
    Some(normalize_status(STATUS_TABLE, &raw))
}

fn dcv_fields(method: DcvMethod) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("FileAuthDVIndicator".to_string(), json!(method == DcvMethod::Http));
    fields.insert("HTTPSFileAuthDVIndicator".to_string(), json!(method == DcvMethod::Https));
    fields.insert("CNAMEAuthDVIndicator".to_string(), json!(method == DcvMethod::Cname));
    fields
}

fn price_table(raw: &Map<String, Value>) -> PriceTable {
    let entries: Vec<&Map<String, Value>> = raw
        .get("PricingInfo")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .collect();
    let mut table = PriceTable::default();
    for (kind, key) in [
        (PriceTierKind::Base, "Price"),
        (PriceTierKind::San, "PricePerAdditionalSAN"),
        (PriceTierKind::WildcardSan, "PricePerWildcardSAN"),
    ] {
        *table.tier_mut(kind) = tier_from_entries(
            entries
                .iter()
                .filter_map(|entry| Some((entry.get("NumberOfMonths")?, entry.get(key)?))),
            PeriodUnit::Months,
        );
    }
    table
}

fn parse_product(raw: &Map<String, Value>) -> Option<CanonicalProduct> {
    let code = text(raw, "ProductCode")?;
    let name = text(raw, "ProductName").unwrap_or_else(|| code.clone());
    let validation_type = if flag(raw, "isEVProduct") {
        ValidationType::Ev
    } else if flag(raw, "isOVProduct") {
        ValidationType::Ov
    } else if flag(raw, "isDVProduct") {
        ValidationType::Dv
    } else {
        ValidationType::infer_from_name(&name)
    };
    let supports_wildcard = flag(raw, "isWildcard") || name.to_ascii_lowercase().contains("wildcard");
    let supports_san = flag(raw, "IsSanEnable");
    let product_type = ProductType::infer(&name, supports_wildcard, supports_san);
    let price_table = price_table(raw);
    let max_domains = number(raw, "MaxSan").map(|max| max + 1).unwrap_or(1).max(1);

    Some(
        CanonicalProduct {
            code,
            name,
            vendor: SLUG.to_string(),
            validation_type,
            product_type,
            supports_wildcard,
            supports_san,
            max_domains,
            min_years: 1,
            max_years: 1,
            price_table,
            vendor_extra: pick(raw, &["VendorName", "ProductType", "MinSan", "MaxSan"]),
        }
        .with_observed_periods(),
    )
}
