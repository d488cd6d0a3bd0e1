use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::core::error::ProviderError;

/// Credential fields for one vendor, keyed by snake_case field name.
#[derive(Clone, Default)]
pub struct Credentials {
    fields: BTreeMap<String, Zeroizing<String>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.fields
            .insert(normalize_field_name(field), Zeroizing::new(value.into()));
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(&normalize_field_name(field))
            .map(|value| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }

    /// Required field, or a `Configuration` error naming the vendor and field.
    pub fn require(&self, vendor: &str, field: &str) -> Result<Zeroizing<String>, ProviderError> {
        self.get(field)
            .map(|value| Zeroizing::new(value.to_string()))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "missing {vendor} credential field: {}",
                    normalize_field_name(field)
                ))
            })
    }

    /// Boolean switch such as `sandbox`; accepts 1/true/yes/on.
    pub fn flag(&self, field: &str) -> bool {
        self.get(field)
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `apiToken`, `API-Token` and `api token` all become `api_token`.
pub fn normalize_field_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut previous_lower = false;
    for c in raw.trim().chars() {
        if c.is_ascii_uppercase() {
            if previous_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            previous_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            previous_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            previous_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}
