//! Service configuration.
//!
//! [`BoundaryConfig`] is always complete: every field has a declared default.
//! Files and callers supply a [`PartialBoundaryConfig`] (camelCase JSON, every field
//! optional) and [`PartialBoundaryConfig::resolve`] turns it into a complete,
//! validated configuration.
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | providers | Overpass (`osm`, priority 1, 5000ms), Nominatim (priority 2, 3000ms, 1 req/s) |
//! | `cache.ttlMs` | 30 days |
//! | `cache.cleanupIntervalMs` | 1 hour |
//! | `queue.maxSize` | 1000 |
//! | `queue.processingIntervalMs` | 5 minutes |
//! | `queue.retry` | 3 attempts, 1000ms base, x2, capped at 30000ms |
//! | `health` | open after 3 failures, 30s cool-down doubling up to 5 minutes |
//! | `defaults` | admin levels {4, 6, 8}, 5000ms, `includeApproximate = true` |
//!
//! # Environment Variables
//!
//! `BOUNDARY_<PROVIDER_ID>_API_KEY` sets `apiConfig.apiKey` for the provider with that id
//! (upper-cased, non-alphanumerics replaced by `_`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::AdminLevels;
use crate::error::ConfigError;
use crate::provider::{ProviderId, ProviderKind};
use crate::retry::Backoff;

pub const OVERPASS_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";
pub const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org";

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// Transport settings of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Client-side request budget; `None` means unlimited.
    pub rate_limit_per_second: Option<u32>,
}

/// One configured provider. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: ProviderId,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Lower is tried first.
    pub priority: u32,
    pub api_config: ApiConfig,
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ProviderConfig {
    pub fn overpass_default() -> Self {
        Self {
            id: ProviderId::new("osm"),
            kind: ProviderKind::Osm,
            priority: 1,
            api_config: default_api_config(ProviderKind::Osm),
            options: serde_json::Map::new(),
        }
    }

    pub fn nominatim_default() -> Self {
        Self {
            id: ProviderId::new("nominatim"),
            kind: ProviderKind::Nominatim,
            priority: 2,
            api_config: default_api_config(ProviderKind::Nominatim),
            options: serde_json::Map::new(),
        }
    }

    /// Configuration for an embedding-supplied adapter registered under `id`.
    pub fn custom(id: impl Into<String>, priority: u32, timeout_ms: u64) -> Self {
        Self {
            id: ProviderId::new(id),
            kind: ProviderKind::Custom,
            priority,
            api_config: ApiConfig {
                timeout_ms,
                ..default_api_config(ProviderKind::Custom)
            },
            options: serde_json::Map::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.api_config.timeout_ms)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_json::Value::as_str)
    }
}

fn default_api_config(kind: ProviderKind) -> ApiConfig {
    match kind {
        ProviderKind::Osm => ApiConfig {
            endpoint: String::from(OVERPASS_ENDPOINT),
            timeout_ms: 5_000,
            api_key: None,
            rate_limit_per_second: None,
        },
        ProviderKind::Nominatim => ApiConfig {
            endpoint: String::from(NOMINATIM_ENDPOINT),
            timeout_ms: 3_000,
            api_key: None,
            // public instance usage policy
            rate_limit_per_second: Some(1),
        },
        ProviderKind::Custom => ApiConfig {
            endpoint: String::new(),
            timeout_ms: 5_000,
            api_key: None,
            rate_limit_per_second: None,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub ttl_ms: u64,
    pub cleanup_interval_ms: u64,
    /// `None` keeps the cache TTL-bounded only.
    pub max_entries: Option<usize>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30 * DAY_MS,
            cleanup_interval_ms: 60 * 60 * 1_000,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomize each delay by +/- 50%.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: Duration::from_millis(self.base_delay_ms),
            factor: self.backoff_multiplier,
            max: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub max_size: usize,
    pub processing_interval_ms: u64,
    /// Wake the worker on enqueue and when the earliest retry falls due, in addition
    /// to the periodic processing tick.
    pub eager_dispatch: bool,
    pub retry: RetryConfig,
}

impl QueueConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            processing_interval_ms: 5 * 60 * 1_000,
            eager_dispatch: true,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub cool_down_ms: u64,
    pub max_cool_down_ms: u64,
}

impl HealthConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn max_cool_down(&self) -> Duration {
        Duration::from_millis(self.max_cool_down_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down_ms: 30_000,
            max_cool_down_ms: 5 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsConfig {
    pub admin_levels: AdminLevels,
    pub timeout_ms: u64,
    pub include_approximate: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            admin_levels: AdminLevels::default(),
            timeout_ms: 5_000,
            include_approximate: true,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryConfig {
    /// Label attached to logs; one service instance per namespace.
    pub namespace: String,
    pub providers: Vec<ProviderConfig>,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub health: HealthConfig,
    pub defaults: DefaultsConfig,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            namespace: String::from("default"),
            providers: vec![
                ProviderConfig::overpass_default(),
                ProviderConfig::nominatim_default(),
            ],
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            health: HealthConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

impl BoundaryConfig {
    pub fn from_partial(partial: PartialBoundaryConfig) -> Result<Self, ConfigError> {
        partial.resolve()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let partial: PartialBoundaryConfig = serde_json::from_str(json)?;
        partial.resolve()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Fills missing API keys from `BOUNDARY_<ID>_API_KEY` via `lookup`.
    pub fn apply_api_keys_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in &mut self.providers {
            if provider.api_config.api_key.is_some() {
                continue;
            }
            let var = api_key_env_var(&provider.id);
            if let Some(key) = lookup(&var).filter(|key| !key.trim().is_empty()) {
                provider.api_config.api_key = Some(key);
            }
        }
    }

    pub fn apply_env_api_keys(&mut self) {
        self.apply_api_keys_from(|name| std::env::var(name).ok());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.clone()) {
                return Err(ConfigError::DuplicateProvider {
                    id: provider.id.to_string(),
                });
            }
            if provider.kind != ProviderKind::Custom
                && provider.api_config.endpoint.trim().is_empty()
            {
                return Err(ConfigError::EmptyEndpoint {
                    id: provider.id.to_string(),
                });
            }
            if provider.api_config.timeout_ms == 0 {
                return Err(ConfigError::ZeroValue {
                    field: "apiConfig.timeoutMs",
                });
            }
        }

        let non_zero = [
            ("cache.ttlMs", self.cache.ttl_ms),
            ("cache.cleanupIntervalMs", self.cache.cleanup_interval_ms),
            ("queue.maxSize", self.queue.max_size as u64),
            ("queue.processingIntervalMs", self.queue.processing_interval_ms),
            ("queue.retry.maxAttempts", u64::from(self.queue.retry.max_attempts)),
            ("health.failureThreshold", u64::from(self.health.failure_threshold)),
            ("health.coolDownMs", self.health.cool_down_ms),
            ("defaults.timeoutMs", self.defaults.timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::ZeroValue {
                field: "cache.maxEntries",
            });
        }

        let multiplier = self.queue.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier { value: multiplier });
        }

        Ok(())
    }
}

fn api_key_env_var(id: &ProviderId) -> String {
    let suffix = id
        .as_str()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("BOUNDARY_{suffix}_API_KEY")
}

// Partial configuration, as read from JSON.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialApiConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub api_key: Option<String>,
    pub rate_limit_per_second: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialProviderConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub api_config: Option<PartialApiConfig>,
    #[serde(default)]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialCacheConfig {
    pub ttl_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialRetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialQueueConfig {
    pub max_size: Option<usize>,
    pub processing_interval_ms: Option<u64>,
    pub eager_dispatch: Option<bool>,
    pub retry: Option<PartialRetryConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialHealthConfig {
    pub failure_threshold: Option<u32>,
    pub cool_down_ms: Option<u64>,
    pub max_cool_down_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialDefaultsConfig {
    pub admin_levels: Option<AdminLevels>,
    pub timeout_ms: Option<u64>,
    pub include_approximate: Option<bool>,
}

/// Partial configuration; unset fields take the declared defaults.
///
/// A provided `providers` list replaces the default provider set entirely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PartialBoundaryConfig {
    pub namespace: Option<String>,
    pub providers: Option<Vec<PartialProviderConfig>>,
    pub cache: Option<PartialCacheConfig>,
    pub queue: Option<PartialQueueConfig>,
    pub health: Option<PartialHealthConfig>,
    pub defaults: Option<PartialDefaultsConfig>,
}

impl PartialBoundaryConfig {
    pub fn resolve(self) -> Result<BoundaryConfig, ConfigError> {
        let base = BoundaryConfig::default();

        let providers = match self.providers {
            None => base.providers,
            Some(partials) => partials
                .into_iter()
                .map(PartialProviderConfig::resolve)
                .collect::<Result<Vec<_>, _>>()?,
        };

        let cache = self.cache.unwrap_or_default();
        let queue = self.queue.unwrap_or_default();
        let retry = queue.retry.unwrap_or_default();
        let health = self.health.unwrap_or_default();
        let defaults = self.defaults.unwrap_or_default();

        let config = BoundaryConfig {
            namespace: self.namespace.unwrap_or(base.namespace),
            providers,
            cache: CacheConfig {
                ttl_ms: cache.ttl_ms.unwrap_or(base.cache.ttl_ms),
                cleanup_interval_ms: cache
                    .cleanup_interval_ms
                    .unwrap_or(base.cache.cleanup_interval_ms),
                max_entries: cache.max_entries.or(base.cache.max_entries),
            },
            queue: QueueConfig {
                max_size: queue.max_size.unwrap_or(base.queue.max_size),
                processing_interval_ms: queue
                    .processing_interval_ms
                    .unwrap_or(base.queue.processing_interval_ms),
                eager_dispatch: queue.eager_dispatch.unwrap_or(base.queue.eager_dispatch),
                retry: RetryConfig {
                    max_attempts: retry.max_attempts.unwrap_or(base.queue.retry.max_attempts),
                    base_delay_ms: retry.base_delay_ms.unwrap_or(base.queue.retry.base_delay_ms),
                    backoff_multiplier: retry
                        .backoff_multiplier
                        .unwrap_or(base.queue.retry.backoff_multiplier),
                    max_delay_ms: retry.max_delay_ms.unwrap_or(base.queue.retry.max_delay_ms),
                    jitter: retry.jitter.unwrap_or(base.queue.retry.jitter),
                },
            },
            health: HealthConfig {
                failure_threshold: health
                    .failure_threshold
                    .unwrap_or(base.health.failure_threshold),
                cool_down_ms: health.cool_down_ms.unwrap_or(base.health.cool_down_ms),
                max_cool_down_ms: health
                    .max_cool_down_ms
                    .unwrap_or(base.health.max_cool_down_ms),
            },
            defaults: DefaultsConfig {
                admin_levels: defaults.admin_levels.unwrap_or(base.defaults.admin_levels),
                timeout_ms: defaults.timeout_ms.unwrap_or(base.defaults.timeout_ms),
                include_approximate: defaults
                    .include_approximate
                    .unwrap_or(base.defaults.include_approximate),
            },
        };

        config.validate()?;
        Ok(config)
    }
}

impl PartialProviderConfig {
    fn resolve(self) -> Result<ProviderConfig, ConfigError> {
        let id = match self.id {
            Some(id) => ProviderId::parse(&id)?,
            None => ProviderId::new(self.kind.as_str()),
        };
        let base = default_api_config(self.kind);
        let api = self.api_config.unwrap_or_default();
        let priority = self.priority.unwrap_or(match self.kind {
            ProviderKind::Osm => 1,
            ProviderKind::Nominatim => 2,
            ProviderKind::Custom => 3,
        });

        Ok(ProviderConfig {
            id,
            kind: self.kind,
            priority,
            api_config: ApiConfig {
                endpoint: api.endpoint.unwrap_or(base.endpoint),
                timeout_ms: api.timeout_ms.unwrap_or(base.timeout_ms),
                api_key: api.api_key.or(base.api_key),
                rate_limit_per_second: api.rate_limit_per_second.or(base.rate_limit_per_second),
            },
            options: self.options.unwrap_or_default(),
        })
    }
}
