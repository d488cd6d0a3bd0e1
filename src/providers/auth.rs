//! Per-vendor request authorization.
//!
//! Three strategies cover the integrated vendors: a refreshable session token
//! obtained through a login call, static fields injected into every body, and
//! credentials embedded in every JSON payload.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use crate::core::error::ProviderError;

use super::http::{HttpRequest, HttpResponse, HttpTransport, RequestBody, status_error};

pub trait AuthStrategy: Send + Sync {
    /// Attaches credentials to an outgoing request.
    fn authorize(
        &self,
        transport: &dyn HttpTransport,
        request: &mut HttpRequest,
    ) -> Result<(), ProviderError>;

    /// Drops any cached session state.
    fn invalidate(&self) {}

    /// Whether an unauthorized response is worth one retry with fresh credentials.
    fn refreshable(&self) -> bool {
        false
    }
}

/// Exchanges username/password for a short-lived token and caches it for the
/// lifetime of the adapter instance.
pub struct SessionTokenAuth {
    vendor: &'static str,
    login_url: String,
    username: String,
    password: Zeroizing<String>,
    token_param: &'static str,
    cached: Mutex<Option<Zeroizing<String>>>,
}

impl SessionTokenAuth {
    pub fn new(
        vendor: &'static str,
        login_url: String,
        username: String,
        password: Zeroizing<String>,
        token_param: &'static str,
    ) -> Self {
        Self {
            vendor,
            login_url,
            username,
            password,
            token_param,
            cached: Mutex::new(None),
        }
    }

    pub fn has_cached_token(&self) -> bool {
        self.cached.lock().map(|cached| cached.is_some()).unwrap_or(false)
    }

    fn token(&self, transport: &dyn HttpTransport) -> Result<Zeroizing<String>, ProviderError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|err| ProviderError::TransportFailure(format!("token lock poisoned: {err}")))?;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login(transport)?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn login(&self, transport: &dyn HttpTransport) -> Result<Zeroizing<String>, ProviderError> {
        debug!("[{}] requesting session token", self.vendor);
        let request = HttpRequest::post_form(
            self.login_url.clone(),
            vec![
                ("user".to_string(), self.username.clone()),
                ("pass".to_string(), self.password.as_str().to_string()),
            ],
        );
        let response = transport.execute(&request)?;
        let body = response.object();
        let key = body
            .and_then(|body| body.get("key"))
            .and_then(Value::as_str)
            .filter(|key| !key.trim().is_empty());

        match key {
            Some(key) if response.is_success() => Ok(Zeroizing::new(key.to_string())),
            _ => {
                let detail = body
                    .and_then(|body| body.get("description").or_else(|| body.get("message")))
                    .and_then(Value::as_str)
                    .unwrap_or("login rejected");
                warn!("[{}] login failed (status {}): {detail}", self.vendor, response.status);
                if response.status >= 500 {
                    return Err(status_error(self.vendor, response.status, Some(detail)));
                }
                Err(ProviderError::AuthenticationFailure(format!(
                    "{} authentication failed: {detail}",
                    self.vendor
                )))
            }
        }
    }
}

impl AuthStrategy for SessionTokenAuth {
    fn authorize(
        &self,
        transport: &dyn HttpTransport,
        request: &mut HttpRequest,
    ) -> Result<(), ProviderError> {
        let token = self.token(transport)?;
        request.query.retain(|(name, _)| name != self.token_param);
        request
            .query
            .push((self.token_param.to_string(), token.as_str().to_string()));
        Ok(())
    }

    fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn refreshable(&self) -> bool {
        true
    }
}

/// Injects long-lived credential fields into every form or JSON body.
pub struct FieldTokenAuth {
    fields: Vec<(String, Zeroizing<String>)>,
}

impl FieldTokenAuth {
    pub fn new(fields: Vec<(String, Zeroizing<String>)>) -> Self {
        Self { fields }
    }

    pub fn single(field: &str, value: Zeroizing<String>) -> Self {
        Self::new(vec![(field.to_string(), value)])
    }
}

impl AuthStrategy for FieldTokenAuth {
    fn authorize(
        &self,
        _transport: &dyn HttpTransport,
        request: &mut HttpRequest,
    ) -> Result<(), ProviderError> {
        match &mut request.body {
            RequestBody::Form(fields) => {
                for (name, value) in &self.fields {
                    fields.retain(|(existing, _)| existing != name);
                    fields.push((name.clone(), value.as_str().to_string()));
                }
            }
            RequestBody::Json(Value::Object(payload)) => {
                for (name, value) in &self.fields {
                    payload.insert(name.clone(), Value::String(value.as_str().to_string()));
                }
            }
            RequestBody::Json(_) => {
                return Err(ProviderError::Configuration(
                    "credential fields require a JSON object payload".to_string(),
                ));
            }
            RequestBody::Empty => {
                request.body = RequestBody::Form(
                    self.fields
                        .iter()
                        .map(|(name, value)| (name.clone(), value.as_str().to_string()))
                        .collect(),
                );
            }
        }
        Ok(())
    }
}

/// Merges an `AuthRequest` object into every JSON payload.
pub struct EmbeddedJsonAuth {
    partner_code: String,
    auth_token: Zeroizing<String>,
}

impl EmbeddedJsonAuth {
    pub fn new(partner_code: String, auth_token: Zeroizing<String>) -> Self {
        Self {
            partner_code,
            auth_token,
        }
    }

    fn auth_object(&self) -> Value {
        json!({
            "PartnerCode": self.partner_code,
            "AuthToken": self.auth_token.as_str(),
        })
    }
}

impl AuthStrategy for EmbeddedJsonAuth {
    fn authorize(
        &self,
        _transport: &dyn HttpTransport,
        request: &mut HttpRequest,
    ) -> Result<(), ProviderError> {
        match &mut request.body {
            RequestBody::Json(Value::Object(payload)) => {
                payload.insert("AuthRequest".to_string(), self.auth_object());
            }
            RequestBody::Empty => {
                request.body = RequestBody::Json(json!({ "AuthRequest": self.auth_object() }));
            }
            _ => {
                return Err(ProviderError::Configuration(
                    "embedded credentials require a JSON object payload".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Transport plus authorization for one adapter instance.
///
/// Only strategies that report [`AuthStrategy::refreshable`] get a retry, and
/// only one: a second unauthorized response surfaces as
/// [`ProviderError::AuthenticationFailure`].
pub struct VendorClient {
    vendor: &'static str,
    transport: Arc<dyn HttpTransport>,
    auth: Box<dyn AuthStrategy>,
}

impl VendorClient {
    pub fn new(
        vendor: &'static str,
        transport: Arc<dyn HttpTransport>,
        auth: Box<dyn AuthStrategy>,
    ) -> Self {
        Self {
            vendor,
            transport,
            auth,
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    pub fn auth(&self) -> &dyn AuthStrategy {
        self.auth.as_ref()
    }

    /// Sends an authorized request. Non-auth HTTP errors are returned as
    /// responses so adapters can inspect vendor error bodies.
    pub fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        let response = self.send_once(request)?;
        if response.status != 401 {
            return self.reject_forbidden(response);
        }
        if !self.auth.refreshable() {
            return Err(status_error(self.vendor, response.status, None));
        }

        debug!("[{}] unauthorized response, refreshing session token", self.vendor);
        self.auth.invalidate();
        let retried = self.send_once(request)?;
        if retried.status == 401 {
            self.auth.invalidate();
            warn!("[{}] still unauthorized after token refresh", self.vendor);
            return Err(ProviderError::AuthenticationFailure(format!(
                "{} authentication failed after token refresh",
                self.vendor
            )));
        }
        self.reject_forbidden(retried)
    }

    fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        let mut authorized = request.clone();
        self.auth.authorize(self.transport.as_ref(), &mut authorized)?;
        self.transport.execute(&authorized)
    }

    fn reject_forbidden(&self, response: HttpResponse) -> Result<HttpResponse, ProviderError> {
        if response.status == 403 {
            return Err(status_error(self.vendor, response.status, None));
        }
        Ok(response)
    }
}
