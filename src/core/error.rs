use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::Capability;

/// Errors produced by provider adapters and the registry.
///
/// Expected business outcomes (a certificate that is not issued yet, a DCV
/// email that could not be resent) are returned as unsuccessful
/// [`ActionResult`](crate::core::types::ActionResult)s instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{vendor} does not support {capability}")]
    UnsupportedOperation {
        vendor: String,
        capability: Capability,
    },
    #[error("{0}")]
    AuthenticationFailure(String),
    #[error("vendor rejected request: {0}")]
    VendorRejected(String),
    #[error("order rejected: {0}")]
    OrderRejected(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid vendor response: {0}")]
    InvalidResponse(String),
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn unsupported(vendor: &str, capability: Capability) -> Self {
        ProviderError::UnsupportedOperation {
            vendor: vendor.to_string(),
            capability,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::UnsupportedOperation { .. } => ErrorCategory::Unsupported,
            ProviderError::AuthenticationFailure(_) => ErrorCategory::AuthError,
            ProviderError::VendorRejected(_) | ProviderError::OrderRejected(_) => {
                ErrorCategory::VendorRejected
            }
            ProviderError::TransportFailure(_) => ErrorCategory::NetworkError,
            ProviderError::NotFound(_) => ErrorCategory::NotFound,
            ProviderError::InvalidResponse(_) => ErrorCategory::InvalidResponse,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Unsupported operations are expected when callers probe vendor tiers.
    pub fn is_expected(&self) -> bool {
        matches!(self, ProviderError::UnsupportedOperation { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::TransportFailure(format!("request timed out: {err}"))
        } else {
            ProviderError::TransportFailure(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Unsupported,
    AuthError,
    VendorRejected,
    NetworkError,
    NotFound,
    InvalidResponse,
    Configuration,
}

/// Reasons a single claim did not produce a canonical row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimErrorKind {
    AlreadyClaimed,
    NotFound,
    Malformed,
    Storage,
}

impl ClaimErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimErrorKind::AlreadyClaimed => "AlreadyClaimed",
            ClaimErrorKind::NotFound => "NotFound",
            ClaimErrorKind::Malformed => "Malformed",
            ClaimErrorKind::Storage => "Storage",
        }
    }
}
