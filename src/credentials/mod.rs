//! Vendor credential lookup.

pub mod store;
pub mod types;

pub use store::{CredentialError, CredentialSource, EnvCredentialSource, StaticCredentialSource};
pub use types::{normalize_field_name, Credentials};
