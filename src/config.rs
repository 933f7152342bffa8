//! Runtime configuration.
//!
//! [`RuntimeConfig`] carries the worker-pool bounds of every channel, the
//! idle keep-alive of surplus workers and the [`FailurePolicy`]. Values are
//! layered by [`ConfigLoader`]:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (feature `config-file`)
//! 3. `ORDO_*` environment variables
//!
//! Later layers override earlier ones. The final configuration is validated
//! before it is returned.

use crate::error::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A pool was configured with zero minimum workers.
    #[error("{pool}: minimum worker count must be at least 1")]
    ZeroMinimum {
        /// Pool name.
        pool: &'static str,
    },
    /// A pool's maximum is below its minimum.
    #[error("{pool}: maximum worker count {max} is below minimum {min}")]
    MaxBelowMin {
        /// Pool name.
        pool: &'static str,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A value could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Key (environment variable or field name).
        key: String,
        /// Raw value.
        value: String,
    },
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Minimum and maximum worker counts of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
    /// Workers kept alive even when idle.
    pub min: usize,
    /// Upper bound on concurrently live workers.
    pub max: usize,
}

impl PoolBounds {
    /// Creates bounds.
    #[must_use]
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Bounds pinned to exactly `n` workers.
    #[must_use]
    pub const fn fixed(n: usize) -> Self {
        Self { min: n, max: n }
    }

    fn validate(self, pool: &'static str) -> Result<(), ConfigError> {
        if self.min == 0 {
            return Err(ConfigError::ZeroMinimum { pool });
        }
        if self.max < self.min {
            return Err(ConfigError::MaxBelowMin {
                pool,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Head dispatcher pool.
    pub head: PoolBounds,
    /// Global event channel pool.
    pub global: PoolBounds,
    /// Elasticity channel pool.
    pub elasticity: PoolBounds,
    /// Async callback pool.
    pub async_pool: PoolBounds,
    /// How long a surplus worker idles before exiting, in milliseconds.
    pub worker_keep_alive_ms: u64,
    /// Reaction to broken ordering invariants.
    pub failure_policy: FailurePolicy,
    /// Record request-to-commit latency samples.
    pub sample_latency: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            head: PoolBounds::fixed(1),
            global: PoolBounds::fixed(1),
            elasticity: PoolBounds::fixed(1),
            async_pool: PoolBounds::new(2, 8),
            worker_keep_alive_ms: 1_000,
            failure_policy: FailurePolicy::Abort,
            sample_latency: false,
        }
    }
}

impl RuntimeConfig {
    /// Returns the surplus-worker keep-alive.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.worker_keep_alive_ms)
    }

    /// Checks every pool bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.head.validate("head")?;
        self.global.validate("global")?;
        self.elasticity.validate("elasticity")?;
        self.async_pool.validate("async")?;
        Ok(())
    }

    /// Applies `ORDO_*` overrides from an environment map.
    fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        apply_usize(env, "ORDO_HEAD_THREADS", &mut self.head.min)?;
        apply_usize(env, "ORDO_MAX_HEAD_THREADS", &mut self.head.max)?;
        apply_usize(env, "ORDO_GLOBAL_THREADS", &mut self.global.min)?;
        apply_usize(env, "ORDO_MAX_GLOBAL_THREADS", &mut self.global.max)?;
        apply_usize(env, "ORDO_ELASTICITY_THREADS", &mut self.elasticity.min)?;
        apply_usize(env, "ORDO_MAX_ELASTICITY_THREADS", &mut self.elasticity.max)?;
        apply_usize(env, "ORDO_ASYNC_THREADS", &mut self.async_pool.min)?;
        apply_usize(env, "ORDO_MAX_ASYNC_THREADS", &mut self.async_pool.max)?;
        if let Some(raw) = env.get("ORDO_WORKER_KEEP_ALIVE_MS") {
            self.worker_keep_alive_ms = parse(raw, "ORDO_WORKER_KEEP_ALIVE_MS")?;
        }
        if let Some(raw) = env.get("ORDO_FAILURE_POLICY") {
            self.failure_policy = raw.parse()?;
        }
        if let Some(raw) = env.get("ORDO_SAMPLE_LATENCY") {
            self.sample_latency = parse(raw, "ORDO_SAMPLE_LATENCY")?;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn apply_usize(
    env: &HashMap<String, String>,
    key: &str,
    slot: &mut usize,
) -> Result<(), ConfigError> {
    if let Some(raw) = env.get(key) {
        *slot = parse(raw, key)?;
    }
    Ok(())
}

/// Layered configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    #[cfg(feature = "config-file")]
    file: Option<std::path::PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Creates a loader that reads the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a TOML file layer.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Replaces the process environment with an explicit map.
    #[must_use]
    pub fn env_overrides(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Resolves every layer and validates the result.
    pub fn load(self) -> Result<RuntimeConfig, ConfigError> {
        #[cfg(feature = "config-file")]
        let mut config = match &self.file {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => RuntimeConfig::default(),
        };
        #[cfg(not(feature = "config-file"))]
        let mut config = RuntimeConfig::default();

        let env = self.env.unwrap_or_else(|| {
            std::env::vars()
                .filter(|(k, _)| k.starts_with("ORDO_"))
                .collect()
        });
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }
}
