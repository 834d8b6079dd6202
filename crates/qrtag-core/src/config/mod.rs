//! Runtime configuration for the sync engine and the API client.
//!
//! `SyncSettings` carries the reconciliation tunables (backoff, retry
//! ceiling, concurrency, trigger interval, remote timeout). `ClientConfig`
//! locates the remote API. Both can be overridden from `QRTAG_*` environment
//! variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

/// API base URL used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

const ENV_API_URL: &str = "QRTAG_API_URL";
const ENV_SYNC_INTERVAL_SECS: &str = "QRTAG_SYNC_INTERVAL_SECS";
const ENV_MAX_ATTEMPTS: &str = "QRTAG_MAX_ATTEMPTS";
const ENV_CONCURRENCY: &str = "QRTAG_SYNC_CONCURRENCY";
const ENV_REMOTE_TIMEOUT_SECS: &str = "QRTAG_REMOTE_TIMEOUT_SECS";

/// Tunables for the operation log, reconciler and orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Delay after the first transient failure (default: 2s)
    pub backoff_base: Duration,
    /// Upper bound for any retry delay (default: 5min)
    pub backoff_cap: Duration,
    /// Relative jitter applied to each delay (default: 0.2 = ±20%)
    pub backoff_jitter: f64,
    /// Failed attempts before an operation is dead-lettered (default: 8)
    pub max_attempts: u32,
    /// Remote calls in flight at once, across entities (default: 3)
    pub concurrency: usize,
    /// Periodic trigger while online; `None` disables it (default: 30s)
    pub interval: Option<Duration>,
    /// Per-call remote timeout (default: 15s)
    pub remote_timeout: Duration,
    /// Merge remote listings after a pass that drained the log (default: true)
    pub pull_after_push: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            backoff_jitter: 0.2,
            max_attempts: 8,
            concurrency: 3,
            interval: Some(Duration::from_secs(30)),
            remote_timeout: Duration::from_secs(15),
            pull_after_push: true,
        }
    }
}

impl SyncSettings {
    /// Defaults overridden by `QRTAG_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(secs) = parse_setting::<u64>(&lookup, ENV_SYNC_INTERVAL_SECS) {
            settings.interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(max_attempts) = parse_setting::<u32>(&lookup, ENV_MAX_ATTEMPTS) {
            settings.max_attempts = max_attempts.max(1);
        }
        if let Some(concurrency) = parse_setting::<usize>(&lookup, ENV_CONCURRENCY) {
            settings.concurrency = concurrency.max(1);
        }
        if let Some(secs) = parse_setting::<u64>(&lookup, ENV_REMOTE_TIMEOUT_SECS) {
            settings.remote_timeout = Duration::from_secs(secs.max(1));
        }

        settings
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the periodic trigger interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Disable the periodic trigger (event-driven passes only)
    #[must_use]
    pub const fn without_interval(mut self) -> Self {
        self.interval = None;
        self
    }

    #[must_use]
    pub const fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_pull_after_push(mut self, enabled: bool) -> Self {
        self.pull_after_push = enabled;
        self
    }
}

fn parse_setting<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = normalize_text_option(lookup(key))?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {key}: {raw}");
            None
        }
    }
}

/// Where the remote API lives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: Some(api_base_url.into()),
        }
    }

    /// Config from `QRTAG_API_URL`, if set
    pub fn from_env() -> Self {
        Self {
            api_base_url: normalize_text_option(std::env::var(ENV_API_URL).ok()),
        }
    }

    /// Fill unset fields from `fallback`
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            api_base_url: normalize_text_option(self.api_base_url)
                .or_else(|| normalize_text_option(fallback.api_base_url)),
        }
    }

    /// Validated base URL without trailing slash, or the default
    pub fn resolve_api_base_url(&self) -> Result<String, String> {
        let Some(url) = normalize_text_option(self.api_base_url.clone()) else {
            return Ok(DEFAULT_API_URL.to_string());
        };
        if is_http_url(&url) {
            Ok(url.trim_end_matches('/').to_string())
        } else {
            Err(format!("API base URL must include http:// or https:// (got '{url}')"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = SyncSettings::default();
        assert_eq!(settings.backoff_base, Duration::from_secs(2));
        assert_eq!(settings.backoff_cap, Duration::from_secs(300));
        assert_eq!(settings.max_attempts, 8);
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.interval, Some(Duration::from_secs(30)));
        assert_eq!(settings.remote_timeout, Duration::from_secs(15));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let values = HashMap::from([
            (ENV_SYNC_INTERVAL_SECS, "0"),
            (ENV_MAX_ATTEMPTS, "5"),
            (ENV_CONCURRENCY, "many"),
            (ENV_REMOTE_TIMEOUT_SECS, " 4 "),
        ]);
        let settings =
            SyncSettings::from_lookup(|key| values.get(key).map(ToString::to_string));

        assert_eq!(settings.interval, None);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.concurrency, 3);
        assert_eq!(settings.remote_timeout, Duration::from_secs(4));
    }

    #[test]
    fn client_config_resolves_default_and_trims_slash() {
        assert_eq!(
            ClientConfig::default().resolve_api_base_url().unwrap(),
            DEFAULT_API_URL
        );
        assert_eq!(
            ClientConfig::new("https://api.example.com/api/")
                .resolve_api_base_url()
                .unwrap(),
            "https://api.example.com/api"
        );
        assert!(ClientConfig::new("api.example.com")
            .resolve_api_base_url()
            .is_err());
    }

    #[test]
    fn client_config_or_prefers_explicit_value() {
        let merged = ClientConfig::new(" ").or(ClientConfig::new("https://fallback.example.com"));
        assert_eq!(
            merged.api_base_url.as_deref(),
            Some("https://fallback.example.com")
        );
    }
}
