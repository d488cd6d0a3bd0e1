use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

use log::debug;
use thiserror::Error;

use super::types::{normalize_field_name, Credentials};

/// Errors produced by credential backends.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials configured for {0}")]
    NotFound(String),
    #[error("credential source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to vendor credentials. The crate never persists them.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, vendor_slug: &str) -> Result<Credentials, CredentialError>;
}

/// In-memory credentials, typically assembled by the host application.
#[derive(Default)]
pub struct StaticCredentialSource {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, vendor_slug: &str, credentials: Credentials) -> Self {
        self.set(vendor_slug, credentials);
        self
    }

    /// Replaces a vendor's credentials. Callers should follow with
    /// `ProviderRegistry::reload_credentials` so cached adapters are rebuilt.
    pub fn set(&self, vendor_slug: &str, credentials: Credentials) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(vendor_slug.to_string(), credentials);
        }
    }

    pub fn remove(&self, vendor_slug: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(vendor_slug);
        }
    }
}

impl CredentialSource for StaticCredentialSource {
    fn credentials(&self, vendor_slug: &str) -> Result<Credentials, CredentialError> {
        let entries = self
            .entries
            .read()
            .map_err(|err| CredentialError::Unavailable(format!("credential map poisoned: {err}")))?;
        entries
            .get(vendor_slug)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(vendor_slug.to_string()))
    }
}

/// Optional settings read for every vendor; adapters ignore the ones they do not use.
const OPTIONAL_FIELDS: &[&str] = &["sandbox", "base_url"];

/// Reads `SSLRESELLER_<SLUG>_<FIELD>` variables for a fixed set of field names.
pub struct EnvCredentialSource {
    prefix: String,
    fields: HashMap<String, Vec<String>>,
}

impl EnvCredentialSource {
    pub const DEFAULT_PREFIX: &'static str = "SSLRESELLER";

    /// Field names per vendor come from the provider descriptors.
    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let fields = crate::providers::VENDORS
            .iter()
            .map(|vendor| {
                let mut names: Vec<String> = vendor
                    .credential_fields
                    .iter()
                    .map(|field| field.to_string())
                    .collect();
                names.extend(OPTIONAL_FIELDS.iter().map(|field| field.to_string()));
                (vendor.slug.to_string(), names)
            })
            .collect();
        Self {
            prefix: prefix.to_string(),
            fields,
        }
    }

    fn variable_name(&self, vendor_slug: &str, field: &str) -> String {
        format!(
            "{}_{}_{}",
            self.prefix,
            vendor_slug.to_ascii_uppercase(),
            normalize_field_name(field).to_ascii_uppercase()
        )
    }
}

impl Default for EnvCredentialSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialSource for EnvCredentialSource {
    fn credentials(&self, vendor_slug: &str) -> Result<Credentials, CredentialError> {
        let names = self
            .fields
            .get(vendor_slug)
            .ok_or_else(|| CredentialError::NotFound(vendor_slug.to_string()))?;
        let mut credentials = Credentials::new();
        for field in names {
            let variable = self.variable_name(vendor_slug, field);
            if let Ok(value) = env::var(&variable) {
                debug!("[credentials] loaded {variable}");
                credentials.insert(field, value);
            }
        }
        if credentials.is_empty() {
            return Err(CredentialError::NotFound(vendor_slug.to_string()));
        }
        Ok(credentials)
    }
}
