use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{ErrorCategory, ProviderError};
use crate::normalize::status::OrderStatus;

/// Uniform `{success, message, ...}` envelope returned to controllers.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_category: None,
            data: Some(data),
        }
    }

    pub fn failed(err: &ProviderError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            error_category: Some(err.category()),
            data: None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// Result of a low-cost credential check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionResult {
    pub ok: bool,
    pub message: String,
    pub balance: Option<Decimal>,
}

impl ConnectionResult {
    pub fn connected(message: impl Into<String>, balance: Option<Decimal>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            balance,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            balance: None,
        }
    }
}

/// Domain control validation method requested for a domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DcvMethod {
    #[default]
    Email,
    Http,
    Https,
    Cname,
}

impl DcvMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcvMethod::Email => "email",
            DcvMethod::Http => "http",
            DcvMethod::Https => "https",
            DcvMethod::Cname => "cname",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Parameters for placing, renewing or reissuing a certificate order.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OrderRequest {
    pub product_code: String,
    pub csr: String,
    /// First entry is the common name, the rest are SANs.
    pub domains: Vec<String>,
    pub period_months: u32,
    #[serde(default)]
    pub dcv_method: DcvMethod,
    #[serde(default)]
    pub approver_email: Option<String>,
    #[serde(default)]
    pub admin_contact: Option<Contact>,
}

impl OrderRequest {
    pub fn common_name(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    pub fn san_domains(&self) -> &[String] {
        if self.domains.len() > 1 {
            &self.domains[1..]
        } else {
            &[]
        }
    }

    /// Whole years covered by the requested period, rounded up.
    pub fn period_years(&self) -> u32 {
        self.period_months.div_ceil(12).max(1)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlacedOrder {
    pub remote_id: String,
    pub status: OrderStatus,
    pub vendor_extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteOrderStatus {
    pub status: OrderStatus,
    pub certificate: Option<String>,
    pub ca_bundle: Option<String>,
    pub domains: Vec<String>,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub vendor_extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateBundle {
    pub certificate: String,
    pub ca_bundle: Option<String>,
}

/// Outcome of a lifecycle action that may fail for expected business reasons.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateBundle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl ActionResult {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            certificate: None,
            remote_id: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            certificate: None,
            remote_id: None,
        }
    }

    pub fn with_certificate(bundle: CertificateBundle) -> Self {
        Self {
            success: true,
            message: "certificate downloaded".to_string(),
            certificate: Some(bundle),
            remote_id: None,
        }
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }
}
