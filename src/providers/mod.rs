//! Uniform provider contract and the vendor adapters implementing it.

use std::collections::BTreeSet;
use std::fmt;

use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{CanonicalProduct, PriceTable};
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, ConnectionResult, DcvMethod, OrderRequest, PlacedOrder, RemoteOrderStatus,
};
use crate::normalize::status::{normalize_status, OrderStatus, StatusTable};

pub mod auth;
pub mod gogetssl;
pub mod http;
pub mod nicsrs;
pub mod payload;
pub mod registry;
pub mod sectigo;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod thesslstore;

pub use auth::{AuthStrategy, EmbeddedJsonAuth, FieldTokenAuth, SessionTokenAuth, VendorClient};
pub use gogetssl::GoGetSslAdapter;
pub use http::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, PacedTransport, RequestBody,
    ReqwestTransport,
};
pub use nicsrs::NicSrsAdapter;
pub use registry::{ProviderInfo, ProviderRegistry};
pub use sectigo::SectigoAdapter;
pub use thesslstore::TheSslStoreAdapter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Order,
    Reissue,
    Renew,
    Revoke,
    Cancel,
    Download,
    DcvEmail,
    DcvHttp,
    DcvCname,
    Balance,
    ConfigLink,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Order => "order",
            Capability::Reissue => "reissue",
            Capability::Renew => "renew",
            Capability::Revoke => "revoke",
            Capability::Cancel => "cancel",
            Capability::Download => "download",
            Capability::DcvEmail => "dcv_email",
            Capability::DcvHttp => "dcv_http",
            Capability::DcvCname => "dcv_cname",
            Capability::Balance => "balance",
            Capability::ConfigLink => "config_link",
        }
    }

    /// Capability a caller needs to use a given DCV method.
    pub fn for_dcv(method: DcvMethod) -> Self {
        match method {
            DcvMethod::Email => Capability::DcvEmail,
            DcvMethod::Http | DcvMethod::Https => Capability::DcvHttp,
            DcvMethod::Cname => Capability::DcvCname,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    Full,
    Limited,
}

impl ProviderTier {
    pub fn capabilities(self) -> BTreeSet<Capability> {
        let mut set = BTreeSet::from([
            Capability::Order,
            Capability::DcvEmail,
            Capability::DcvHttp,
            Capability::DcvCname,
        ]);
        if self == ProviderTier::Full {
            set.extend([
                Capability::Reissue,
                Capability::Renew,
                Capability::Revoke,
                Capability::Cancel,
                Capability::Download,
            ]);
        }
        set
    }
}

/// Contract every vendor adapter implements.
///
/// Optional operations default to [`ProviderError::UnsupportedOperation`];
/// adapters override the ones their capability set declares.
pub trait Provider: Send + Sync {
    fn slug(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn tier(&self) -> ProviderTier;

    fn capabilities(&self) -> BTreeSet<Capability>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn require(&self, capability: Capability) -> Result<(), ProviderError> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(ProviderError::unsupported(self.slug(), capability))
        }
    }

    /// Cheap credential check. Expected auth failures come back as `ok = false`.
    fn test_connection(&self) -> ConnectionResult;

    fn fetch_products(&self) -> Result<Vec<CanonicalProduct>, ProviderError>;

    fn fetch_pricing(&self, product_code: &str) -> Result<PriceTable, ProviderError>;

    fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, ProviderError>;

    fn get_order_status(&self, remote_id: &str) -> Result<RemoteOrderStatus, ProviderError>;

    fn download_certificate(&self, _remote_id: &str) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Download))
    }

    fn reissue_certificate(
        &self,
        _remote_id: &str,
        _request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Reissue))
    }

    fn renew_certificate(
        &self,
        _remote_id: &str,
        _request: &OrderRequest,
    ) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Renew))
    }

    fn revoke_certificate(&self, _remote_id: &str, _reason: &str) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Revoke))
    }

    fn cancel_order(&self, _remote_id: &str, _reason: &str) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Cancel))
    }

    fn get_dcv_emails(&self, _domain: &str) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::DcvEmail))
    }

    fn resend_dcv_email(&self, _remote_id: &str) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::DcvEmail))
    }

    fn change_dcv_method(
        &self,
        _remote_id: &str,
        _domain: &str,
        method: DcvMethod,
        _approver_email: Option<&str>,
    ) -> Result<ActionResult, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::for_dcv(method)))
    }

    fn get_balance(&self) -> Result<Decimal, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::Balance))
    }

    fn config_link(&self, _remote_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::unsupported(self.slug(), Capability::ConfigLink))
    }
}

/// Static description of an integrated vendor.
#[derive(Debug, Clone, Copy)]
pub struct VendorDescriptor {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub tier: ProviderTier,
    pub credential_fields: &'static [&'static str],
    pub statuses: &'static StatusTable,
    /// Capabilities on top of the tier baseline.
    pub extra_capabilities: &'static [Capability],
}

impl VendorDescriptor {
    pub fn capabilities(&self) -> BTreeSet<Capability> {
        let mut set = self.tier.capabilities();
        set.extend(self.extra_capabilities.iter().copied());
        set
    }
}

pub static VENDORS: &[VendorDescriptor] = &[
    gogetssl::DESCRIPTOR,
    nicsrs::DESCRIPTOR,
    thesslstore::DESCRIPTOR,
    sectigo::DESCRIPTOR,
];

/// Legacy module names and brand aliases that route to an integrated vendor.
static VENDOR_ALIASES: &[(&str, &str)] = &[
    ("ggssl", "gogetssl"),
    ("gogetsslmodule", "gogetssl"),
    ("nicsrsssl", "nicsrs"),
    ("nicsrs_ssl", "nicsrs"),
    ("thesslstoressl", "thesslstore"),
    ("thesslstore_ssl", "thesslstore"),
    ("sslstore", "thesslstore"),
    ("comodo", "sectigo"),
    ("comodossl", "sectigo"),
    ("sectigossl", "sectigo"),
];

pub fn descriptor(slug: &str) -> Option<&'static VendorDescriptor> {
    VENDORS.iter().find(|vendor| vendor.slug == slug)
}

/// Resolves a vendor name or legacy alias to a known slug.
pub fn canonical_vendor_slug(raw: &str) -> Option<&'static str> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if let Some(vendor) = descriptor(&lowered) {
        return Some(vendor.slug);
    }
    let compact: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    VENDOR_ALIASES
        .iter()
        .find(|(alias, _)| *alias == compact || *alias == compact.replace('_', ""))
        .map(|(_, slug)| *slug)
        .or_else(|| descriptor(&compact.replace('_', "")).map(|vendor| vendor.slug))
}

/// Turns vendor-side refusals of a lifecycle action into an unsuccessful
/// [`ActionResult`]. Auth, transport and parse failures still propagate.
pub(crate) fn business_outcome(
    vendor: &str,
    result: Result<ActionResult, ProviderError>,
) -> Result<ActionResult, ProviderError> {
    match result {
        Err(ProviderError::VendorRejected(reason) | ProviderError::OrderRejected(reason)) => {
            warn!("[{vendor}] action refused: {reason}");
            Ok(ActionResult::refused(reason))
        }
        other => other,
    }
}

/// Normalizes a vendor status string without needing an adapter instance.
/// Unknown vendors fall back to the generic vocabulary.
pub fn normalize_vendor_status(vendor: &str, raw: &str) -> OrderStatus {
    let table = canonical_vendor_slug(vendor)
        .and_then(descriptor)
        .map(|vendor| vendor.statuses)
        .unwrap_or(&[]);
    normalize_status(table, raw)
}
