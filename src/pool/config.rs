// ABOUTME: Configuration for provider pools and the pool manager
//
// Defines PoolConfig (per provider) and ManagerConfig (process-wide):
// - Pool capacity and optional acquire deadline
// - Health check interval
// - Event buffer size
// - Per-provider overrides loaded from TOML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{PoolError, PoolResult};
use super::events::DEFAULT_EVENT_CAPACITY;

/// Default period between health checks for every provider
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for a single provider's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections the pool may hold
    pub pool_size: usize,

    /// How long `acquire` waits on a saturated pool (None waits forever)
    #[serde(
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Config with the given capacity and no acquire deadline
    #[must_use]
    pub fn with_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.pool_size == 0 {
            return Err(PoolError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }

        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(PoolError::InvalidConfig(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Process-wide settings for the `PoolManager`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Interval between health checks
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,

    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,

    /// Per-provider pool settings, keyed by provider id
    pub providers: HashMap<String, PoolConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            providers: HashMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from default locations
    ///
    /// Later files override earlier ones; missing files are skipped.
    pub fn load() -> Result<Self> {
        let home_dir = dirs::home_dir();
        let cwd = std::env::current_dir().ok();
        Self::load_from(&Self::get_config_paths(home_dir.as_deref(), cwd.as_deref()))
    }

    /// Merge the given files in order, skipping any that do not exist
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut config = Self::default();

        for path in paths {
            if path.exists() {
                config.merge(Self::from_file(path)?);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.health_check_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        for (provider, pool) in &self.providers {
            pool.validate().map_err(|e| match e {
                PoolError::InvalidConfig(reason) => {
                    PoolError::InvalidConfig(format!("provider '{provider}': {reason}"))
                }
                other => other,
            })?;
        }

        Ok(())
    }

    /// Pool settings for a provider, falling back to defaults
    pub fn pool_config(&self, provider_id: &str) -> PoolConfig {
        self.providers.get(provider_id).cloned().unwrap_or_default()
    }

    /// Configuration file paths in order of precedence (lowest first)
    fn get_config_paths(home_dir: Option<&Path>, cwd: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. User config (~/.provider-pool/config.toml)
        if let Some(home_dir) = home_dir {
            paths.push(home_dir.join(".provider-pool").join("config.toml"));
        }

        // 2. Local project config
        if let Some(cwd) = cwd {
            paths.push(cwd.join(".provider-pool").join("config.toml"));
        }

        paths
    }

    /// Merge another config into this one
    ///
    /// Scalars left at their defaults in `other` do not override.
    fn merge(&mut self, other: ManagerConfig) {
        if other.health_check_interval != DEFAULT_HEALTH_CHECK_INTERVAL {
            self.health_check_interval = other.health_check_interval;
        }
        if other.event_capacity != DEFAULT_EVENT_CAPACITY {
            self.event_capacity = other.event_capacity;
        }
        self.providers.extend(other.providers);
    }
}

/// Serde helper for Duration as seconds (u64)
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Option<Duration> as seconds
pub(crate) mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// Serde helper for Duration as fractional milliseconds
pub(crate) mod duration_millis {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        to_millis(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis / 1000.0).map_err(D::Error::custom)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn to_millis(duration: Duration) -> f64 {
        duration.as_nanos() as f64 / 1_000_000.0
    }
}

/// Serde helper for Option<Duration> as fractional milliseconds
pub(crate) mod option_duration_millis {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(super::duration_millis::to_millis).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|millis| Duration::try_from_secs_f64(millis / 1000.0).map_err(D::Error::custom))
            .transpose()
    }
}
