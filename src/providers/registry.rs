use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::catalog::{CanonicalProduct, PriceTable};
use crate::config::Config;
use crate::core::error::ProviderError;
use crate::core::types::{
    ActionResult, ConnectionResult, DcvMethod, OperationResult, OrderRequest, PlacedOrder,
    RemoteOrderStatus,
};
use crate::credentials::{CredentialError, CredentialSource, Credentials};
use crate::storage::ProviderSettingsStore;

use super::http::{HttpTransport, PacedTransport, ReqwestTransport};
use super::{
    canonical_vendor_slug, descriptor, gogetssl, nicsrs, sectigo, thesslstore, Capability,
    GoGetSslAdapter, NicSrsAdapter, Provider, ProviderTier, SectigoAdapter, TheSslStoreAdapter,
    VendorDescriptor, VENDORS,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderInfo {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub tier: ProviderTier,
    pub capabilities: BTreeSet<Capability>,
    pub enabled: bool,
}

/// Resolves vendor slugs to configured adapter instances and exposes every
/// provider operation as an [`OperationResult`].
///
/// Instances are cached, so an adapter's session token lives as long as the
/// cached instance. Disabling a provider or reloading its credentials evicts it.
pub struct ProviderRegistry {
    credentials: Arc<dyn CredentialSource>,
    settings: ProviderSettingsStore,
    transport: Arc<dyn HttpTransport>,
    config: Config,
    instances: Mutex<HashMap<&'static str, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        settings: ProviderSettingsStore,
        transport: Arc<dyn HttpTransport>,
        config: Config,
    ) -> Self {
        Self {
            credentials,
            settings,
            transport,
            config,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registry over real HTTP using the configured timeout.
    pub fn with_http(
        credentials: Arc<dyn CredentialSource>,
        settings: ProviderSettingsStore,
        config: Config,
    ) -> Self {
        let transport = Arc::new(ReqwestTransport::new(config.http_timeout));
        Self::new(credentials, settings, transport, config)
    }

    pub fn available(&self) -> Vec<ProviderInfo> {
        let flags = self.settings.all().unwrap_or_else(|err| {
            warn!("[registry] failed to read provider settings: {err:#}");
            HashMap::new()
        });
        VENDORS
            .iter()
            .map(|vendor| ProviderInfo {
                slug: vendor.slug,
                display_name: vendor.display_name,
                tier: vendor.tier,
                capabilities: vendor.capabilities(),
                enabled: flags.get(vendor.slug).copied().unwrap_or(true),
            })
            .collect()
    }

    pub fn get(&self, slug: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let vendor = resolve(slug)?;
        let enabled = self
            .settings
            .is_enabled(vendor.slug)
            .map_err(|err| ProviderError::Configuration(format!("{err:#}")))?;
        if !enabled {
            return Err(ProviderError::Configuration(format!(
                "{} is disabled",
                vendor.display_name
            )));
        }

        let mut instances = self.lock_instances()?;
        if let Some(provider) = instances.get(vendor.slug) {
            return Ok(provider.clone());
        }

        let credentials = self.credentials.credentials(vendor.slug).map_err(|err| match err {
            CredentialError::NotFound(_) => ProviderError::Configuration(format!(
                "no credentials configured for {}",
                vendor.display_name
            )),
            CredentialError::Unavailable(reason) => ProviderError::Configuration(reason),
        })?;
        let paced: Arc<dyn HttpTransport> = Arc::new(PacedTransport::new(
            self.transport.clone(),
            self.config.pacing_for(vendor.tier),
        ));
        let provider = build_adapter(vendor.slug, &credentials, paced)?;
        info!("[registry] initialized {} adapter", vendor.display_name);
        instances.insert(vendor.slug, provider.clone());
        Ok(provider)
    }

    pub fn set_enabled(&self, slug: &str, enabled: bool) -> Result<(), ProviderError> {
        let vendor = resolve(slug)?;
        self.settings
            .set_enabled(vendor.slug, enabled)
            .map_err(|err| ProviderError::Configuration(format!("{err:#}")))?;
        if !enabled {
            self.evict(vendor.slug)?;
        }
        info!(
            "[registry] {} {}",
            vendor.display_name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Drops the cached adapter, and with it any session token, so the next
    /// `get` reads fresh credentials.
    pub fn reload_credentials(&self, slug: &str) -> Result<(), ProviderError> {
        let vendor = resolve(slug)?;
        self.evict(vendor.slug)?;
        debug!("[registry] credentials reloaded for {}", vendor.slug);
        Ok(())
    }

    pub fn test_connection(&self, slug: &str) -> OperationResult<ConnectionResult> {
        match self.get(slug) {
            Ok(provider) => {
                let result = provider.test_connection();
                if !result.ok {
                    warn!("[registry] {} connection test failed: {}", provider.slug(), result.message);
                }
                OperationResult {
                    success: result.ok,
                    message: result.message.clone(),
                    error_category: None,
                    data: Some(result),
                }
            }
            Err(err) => failed(slug, "test_connection", err),
        }
    }

    pub fn fetch_products(&self, slug: &str) -> OperationResult<Vec<CanonicalProduct>> {
        self.run(slug, "fetch_products", |provider| {
            let products = provider.fetch_products()?;
            let message = format!("fetched {} products", products.len());
            Ok((products, message))
        })
    }

    pub fn fetch_pricing(&self, slug: &str, product_code: &str) -> OperationResult<PriceTable> {
        self.run(slug, "fetch_pricing", |provider| {
            let prices = provider.fetch_pricing(product_code)?;
            Ok((prices, format!("pricing loaded for {product_code}")))
        })
    }

    pub fn place_order(&self, slug: &str, request: &OrderRequest) -> OperationResult<PlacedOrder> {
        self.run(slug, "place_order", |provider| {
            provider.require(Capability::Order)?;
            let placed = provider.place_order(request)?;
            let message = format!("order {} placed", placed.remote_id);
            Ok((placed, message))
        })
    }

    pub fn order_status(&self, slug: &str, remote_id: &str) -> OperationResult<RemoteOrderStatus> {
        self.run(slug, "order_status", |provider| {
            let status = provider.get_order_status(remote_id)?;
            let message = status.status.label().to_string();
            Ok((status, message))
        })
    }

    pub fn download_certificate(&self, slug: &str, remote_id: &str) -> OperationResult<ActionResult> {
        self.run_action(slug, "download_certificate", |provider| {
            provider.require(Capability::Download)?;
            provider.download_certificate(remote_id)
        })
    }

    pub fn reissue_certificate(
        &self,
        slug: &str,
        remote_id: &str,
        request: &OrderRequest,
    ) -> OperationResult<ActionResult> {
        self.run_action(slug, "reissue_certificate", |provider| {
            provider.require(Capability::Reissue)?;
            provider.reissue_certificate(remote_id, request)
        })
    }

    pub fn renew_certificate(
        &self,
        slug: &str,
        remote_id: &str,
        request: &OrderRequest,
    ) -> OperationResult<ActionResult> {
        self.run_action(slug, "renew_certificate", |provider| {
            provider.require(Capability::Renew)?;
            provider.renew_certificate(remote_id, request)
        })
    }

    pub fn revoke_certificate(
        &self,
        slug: &str,
        remote_id: &str,
        reason: &str,
    ) -> OperationResult<ActionResult> {
        self.run_action(slug, "revoke_certificate", |provider| {
            provider.require(Capability::Revoke)?;
            provider.revoke_certificate(remote_id, reason)
        })
    }

    pub fn cancel_order(&self, slug: &str, remote_id: &str, reason: &str) -> OperationResult<ActionResult> {
        self.run_action(slug, "cancel_order", |provider| {
            provider.require(Capability::Cancel)?;
            provider.cancel_order(remote_id, reason)
        })
    }

    pub fn dcv_emails(&self, slug: &str, domain: &str) -> OperationResult<Vec<String>> {
        self.run(slug, "dcv_emails", |provider| {
            let emails = provider.get_dcv_emails(domain)?;
            let message = format!("{} approver addresses", emails.len());
            Ok((emails, message))
        })
    }

    pub fn resend_dcv_email(&self, slug: &str, remote_id: &str) -> OperationResult<ActionResult> {
        self.run_action(slug, "resend_dcv_email", |provider| provider.resend_dcv_email(remote_id))
    }

    pub fn change_dcv_method(
        &self,
        slug: &str,
        remote_id: &str,
        domain: &str,
        method: DcvMethod,
        approver_email: Option<&str>,
    ) -> OperationResult<ActionResult> {
        self.run_action(slug, "change_dcv_method", |provider| {
            provider.require(Capability::for_dcv(method))?;
            provider.change_dcv_method(remote_id, domain, method, approver_email)
        })
    }

    pub fn balance(&self, slug: &str) -> OperationResult<Decimal> {
        self.run(slug, "balance", |provider| {
            let balance = provider.get_balance()?;
            Ok((balance, format!("balance {balance}")))
        })
    }

    pub fn config_link(&self, slug: &str, remote_id: &str) -> OperationResult<String> {
        self.run(slug, "config_link", |provider| {
            let link = provider.config_link(remote_id)?;
            Ok((link, "configuration link created".to_string()))
        })
    }

    fn run<T>(
        &self,
        slug: &str,
        operation: &str,
        call: impl FnOnce(&dyn Provider) -> Result<(T, String), ProviderError>,
    ) -> OperationResult<T> {
        let result = self.get(slug).and_then(|provider| call(provider.as_ref()));
        match result {
            Ok((data, message)) => OperationResult::ok(data, message),
            Err(err) => failed(slug, operation, err),
        }
    }

    /// Lifecycle actions carry their own success flag for business refusals.
    fn run_action(
        &self,
        slug: &str,
        operation: &str,
        call: impl FnOnce(&dyn Provider) -> Result<ActionResult, ProviderError>,
    ) -> OperationResult<ActionResult> {
        match self.get(slug).and_then(|provider| call(provider.as_ref())) {
            Ok(action) => OperationResult {
                success: action.success,
                message: action.message.clone(),
                error_category: None,
                data: Some(action),
            },
            Err(err) => failed(slug, operation, err),
        }
    }

    fn evict(&self, slug: &str) -> Result<(), ProviderError> {
        if self.lock_instances()?.remove(slug).is_some() {
            debug!("[registry] evicted cached {slug} adapter");
        }
        Ok(())
    }

    fn lock_instances(&self) -> Result<MutexGuard<'_, HashMap<&'static str, Arc<dyn Provider>>>, ProviderError> {
        self.instances
            .lock()
            .map_err(|err| ProviderError::Configuration(format!("registry cache poisoned: {err}")))
    }
}

fn resolve(slug: &str) -> Result<&'static VendorDescriptor, ProviderError> {
    canonical_vendor_slug(slug)
        .and_then(descriptor)
        .ok_or_else(|| ProviderError::Configuration(format!("unknown provider: {slug}")))
}

fn build_adapter(
    slug: &str,
    credentials: &Credentials,
    transport: Arc<dyn HttpTransport>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match slug {
        gogetssl::SLUG => Arc::new(GoGetSslAdapter::from_credentials(credentials, transport)?),
        nicsrs::SLUG => Arc::new(NicSrsAdapter::from_credentials(credentials, transport)?),
        thesslstore::SLUG => Arc::new(TheSslStoreAdapter::from_credentials(credentials, transport)?),
        sectigo::SLUG => Arc::new(SectigoAdapter::from_credentials(credentials, transport)?),
        other => {
            return Err(ProviderError::Configuration(format!(
                "provider '{other}' does not have an adapter"
            )));
        }
    };
    Ok(provider)
}

fn failed<T>(slug: &str, operation: &str, err: ProviderError) -> OperationResult<T> {
    if err.is_expected() {
        debug!("[registry] {slug} {operation}: {err}");
    } else {
        warn!("[registry] {slug} {operation} failed: {err}");
    }
    OperationResult::failed(&err)
}
