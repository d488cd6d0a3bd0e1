use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::blocking::Client;
use serde_json::{Map, Value};

use crate::core::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Form(fields),
        }
    }

    pub fn post_json(url: impl Into<String>, payload: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            query: Vec::new(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: RequestBody::Json(payload),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Raw vendor response. `decoded_body` is `Some` when the body parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub raw_body: String,
    pub decoded_body: Option<Value>,
}

impl HttpResponse {
    pub fn new(status: u16, raw_body: impl Into<String>) -> Self {
        let raw_body = raw_body.into();
        let decoded_body = serde_json::from_str(&raw_body).ok();
        Self {
            status,
            raw_body,
            decoded_body,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            raw_body: body.to_string(),
            decoded_body: Some(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn object(&self) -> Option<&Map<String, Value>> {
        self.decoded_body.as_ref().and_then(Value::as_object)
    }

    /// Decoded JSON object, or `InvalidResponse` naming the vendor.
    pub fn require_object(&self, vendor: &str) -> Result<&Map<String, Value>, ProviderError> {
        self.object().ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "{vendor} returned a non-JSON body: {}",
                truncate(&self.raw_body, 200)
            ))
        })
    }
}

/// Request/response exchange used by every adapter.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError>;
}

/// Production transport backed by a blocking reqwest client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            warn!("[http] invalid timeout value; using default");
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!("[http] failed to build client: {err}");
                Client::new()
            });
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(payload) => builder.json(payload),
        };

        let response = builder.send()?;
        let status = response.status().as_u16();
        let raw_body = response.text()?;
        Ok(HttpResponse::new(status, raw_body))
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Enforces a minimum interval between successive calls through the wrapped
/// transport. Calls are serialized while the interval is being waited out.
pub struct PacedTransport {
    inner: Arc<dyn HttpTransport>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PacedTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl HttpTransport for PacedTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        if self.min_interval.is_zero() {
            return self.inner.execute(request);
        }
        let mut last_call = self
            .last_call
            .lock()
            .map_err(|err| ProviderError::TransportFailure(format!("pacing lock poisoned: {err}")))?;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("[http] pacing vendor call, waiting {}ms", wait.as_millis());
                thread::sleep(wait);
            }
        }
        let result = self.inner.execute(request);
        *last_call = Some(Instant::now());
        result
    }
}

/// Maps a non-success HTTP status to the error taxonomy.
pub fn status_error(vendor: &str, status: u16, body: Option<&str>) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailure(format!("{vendor} authentication failed")),
        404 => ProviderError::NotFound(format!("{vendor} resource not found")),
        429 => ProviderError::TransportFailure(format!("{vendor} rate limit exceeded")),
        500..=599 => ProviderError::TransportFailure(format!("{vendor} server error: {status}")),
        _ => match body.map(str::trim).filter(|body| !body.is_empty()) {
            Some(body) => ProviderError::VendorRejected(format!(
                "{vendor} API error: {}",
                truncate(body, 300)
            )),
            None => ProviderError::VendorRejected(format!("{vendor} API error: {status}")),
        },
    }
}

fn truncate(raw: &str, max: usize) -> String {
    if raw.chars().count() <= max {
        raw.to_string()
    } else {
        let mut out: String = raw.chars().take(max).collect();
        out.push('…');
        out
    }
}
