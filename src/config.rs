use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::providers::ProviderTier;

pub const DATA_DIR_ENV: &str = "SSLRESELLER_DATA_DIR";
pub const HTTP_TIMEOUT_ENV: &str = "SSLRESELLER_HTTP_TIMEOUT_SECS";
pub const PACING_ENV: &str = "SSLRESELLER_PACING_MS";
pub const LIMITED_PACING_ENV: &str = "SSLRESELLER_LIMITED_PACING_MS";
pub const EXPIRING_DAYS_ENV: &str = "SSLRESELLER_EXPIRING_DAYS";
pub const RECENT_LIMIT_ENV: &str = "SSLRESELLER_RECENT_LIMIT";

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PACING_MS: u64 = 250;
const DEFAULT_LIMITED_PACING_MS: u64 = 1000;
const DEFAULT_EXPIRING_DAYS: u64 = 30;
const DEFAULT_RECENT_LIMIT: u64 = 10;

/// Runtime settings shared by the registry, storage and aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    /// Minimum spacing between calls to a full-tier vendor.
    pub pacing_interval: Duration,
    /// Minimum spacing between calls to a limited-tier vendor.
    pub limited_pacing_interval: Duration,
    pub expiring_days: u32,
    pub recent_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pacing_interval: Duration::from_millis(DEFAULT_PACING_MS),
            limited_pacing_interval: Duration::from_millis(DEFAULT_LIMITED_PACING_MS),
            expiring_days: DEFAULT_EXPIRING_DAYS as u32,
            recent_limit: DEFAULT_RECENT_LIMIT as usize,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env::var(DATA_DIR_ENV)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            http_timeout: Duration::from_secs(resolve_positive(HTTP_TIMEOUT_ENV, DEFAULT_TIMEOUT_SECS)),
            pacing_interval: Duration::from_millis(resolve_positive(PACING_ENV, DEFAULT_PACING_MS)),
            limited_pacing_interval: Duration::from_millis(resolve_positive(
                LIMITED_PACING_ENV,
                DEFAULT_LIMITED_PACING_MS,
            )),
            expiring_days: resolve_positive(EXPIRING_DAYS_ENV, DEFAULT_EXPIRING_DAYS)
                .try_into()
                .unwrap_or(defaults.expiring_days),
            recent_limit: resolve_positive(RECENT_LIMIT_ENV, DEFAULT_RECENT_LIMIT)
                .try_into()
                .unwrap_or(defaults.recent_limit),
        }
    }

    pub fn pacing_for(&self, tier: ProviderTier) -> Duration {
        match tier {
            ProviderTier::Full => self.pacing_interval,
            ProviderTier::Limited => self.limited_pacing_interval,
        }
    }

    /// Test and embedding helper: no pacing at all.
    pub fn without_pacing(mut self) -> Self {
        self.pacing_interval = Duration::ZERO;
        self.limited_pacing_interval = Duration::ZERO;
        self
    }
}

fn resolve_positive(key: &str, default: u64) -> u64 {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => {
            warn!("[config] invalid {key} value {raw:?}; using default {default}");
            default
        }
    }
}
