//! # Cache Config
//!
//! Environment-driven configuration for hypercache.
//!
//! Every recognized setting lives in a closed record with an explicit
//! field; there is no reflective iteration over configuration arrays.
//! Records are built either programmatically (with [`Default`] as the
//! baseline) or from the process environment via `from_env()`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use cache_core::CacheError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting held a value that could not be parsed
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Environment key
        key: String,
        /// Offending value
        value: String,
        /// Parse failure description
        reason: String,
    },

    /// Pool bounds are inverted; rejected at construction
    #[error("pool_min ({min}) exceeds pool_max ({max})")]
    InvalidPoolBounds {
        /// Configured minimum
        min: u32,
        /// Configured maximum
        max: u32,
    },
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        Self::ClusterMisconfigured {
            reason: err.to_string(),
        }
    }
}

/// Parse a memory size string: a bare integer is bytes, and `K`, `M`, `G`
/// suffixes scale by 1024.
///
/// # Errors
/// [`ConfigError::InvalidValue`] for anything else.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: "size".to_string(),
        value: input.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty size string"));
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K' | 'k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('M' | 'm') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('G' | 'g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };

    let base: u64 = digits
        .parse()
        .map_err(|_| invalid("expected <int> with optional K/M/G suffix"))?;

    base.checked_mul(multiplier)
        .ok_or_else(|| invalid("size overflows u64"))
}

/// Read an environment variable, falling back to `default`
pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, warning (and falling back to
/// `default`) when the value does not parse
pub fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, "Unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Which engine the selector should prefer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnginePreference {
    /// Rank available engines by performance level
    Auto,
    /// Prefer the named engine when it is available
    Named(String),
}

impl EnginePreference {
    fn from_setting(value: &str) -> Self {
        if value.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Named(value.to_string())
        }
    }
}

/// Top-level cache settings (`CACHE_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Preferred engine (`CACHE_ENGINE`, default `auto`)
    pub engine: EnginePreference,
    /// Fallback store name (`CACHE_DEFAULT_STORE`, default `redis`)
    pub default_store: String,
    /// Item count above which batched paths are preferred
    /// (`CACHE_ASYNC_THRESHOLD`, default 1000)
    pub async_threshold: usize,
    /// Batch size for chunked multi-key operations (`CACHE_BATCH_SIZE`,
    /// default 100)
    pub batch_size: usize,
    /// Overall memory budget in bytes (`CACHE_MEMORY_LIMIT`, default 256M)
    pub memory_limit: u64,
    /// Default TTL applied when callers pass none (`CACHE_TTL_DEFAULT`,
    /// default 3600 s)
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            engine: EnginePreference::Auto,
            default_store: "redis".to_string(),
            async_threshold: 1000,
            batch_size: 100,
            memory_limit: 256 * 1024 * 1024,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheSettings {
    /// Load settings from the environment, defaulting unset keys
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let memory_limit = match std::env::var("CACHE_MEMORY_LIMIT") {
            Ok(raw) => parse_size(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid CACHE_MEMORY_LIMIT, using default");
                defaults.memory_limit
            }),
            Err(_) => defaults.memory_limit,
        };

        Self {
            engine: EnginePreference::from_setting(&env_string("CACHE_ENGINE", "auto")),
            default_store: env_string("CACHE_DEFAULT_STORE", "redis"),
            async_threshold: env_parse("CACHE_ASYNC_THRESHOLD", defaults.async_threshold),
            batch_size: env_parse("CACHE_BATCH_SIZE", defaults.batch_size),
            memory_limit,
            default_ttl: Duration::from_secs(env_parse("CACHE_TTL_DEFAULT", 3600u64)),
        }
    }
}

/// Memory engine settings (`CACHE_MEMORY_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Hard byte budget (`CACHE_MEMORY_MAX_SIZE`, default 100M)
    pub max_size: u64,
    /// Interval between synchronous expired-entry sweeps
    /// (`CACHE_MEMORY_CLEANUP_INTERVAL`, default 300 s)
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: 100 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl MemoryConfig {
    /// Load memory engine settings from the environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_size = match std::env::var("CACHE_MEMORY_MAX_SIZE") {
            Ok(raw) => parse_size(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid CACHE_MEMORY_MAX_SIZE, using default");
                defaults.max_size
            }),
            Err(_) => defaults.max_size,
        };

        Self {
            max_size,
            cleanup_interval: Duration::from_secs(env_parse(
                "CACHE_MEMORY_CLEANUP_INTERVAL",
                300u64,
            )),
        }
    }
}

/// File engine settings (`CACHE_FILE_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Root directory for cache files (`CACHE_FILE_PATH`, default
    /// `storage/cache`)
    pub path: PathBuf,
    /// Unix permission bits for created directories
    /// (`CACHE_FILE_PERMISSIONS`, default 0o755)
    pub permissions: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage/cache"),
            permissions: 0o755,
        }
    }
}

impl FileConfig {
    /// Load file engine settings from the environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let permissions = match std::env::var("CACHE_FILE_PERMISSIONS") {
            Ok(raw) => u32::from_str_radix(raw.trim_start_matches("0o"), 8).unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid CACHE_FILE_PERMISSIONS, using default");
                defaults.permissions
            }),
            Err(_) => defaults.permissions,
        };

        Self {
            path: PathBuf::from(env_string("CACHE_FILE_PATH", "storage/cache")),
            permissions,
        }
    }
}

/// Remote backend connection settings (`CACHE_REDIS_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server host (`CACHE_REDIS_HOST`, default 127.0.0.1)
    pub host: String,
    /// Server port (`CACHE_REDIS_PORT`, default 6379)
    pub port: u16,
    /// Optional AUTH password (`CACHE_REDIS_PASSWORD`)
    pub password: Option<String>,
    /// Logical database index (`CACHE_REDIS_DATABASE`, default 0)
    pub database: i64,
    /// Pool warm-up target (`CACHE_REDIS_POOL_MIN`, default 5)
    pub pool_min: u32,
    /// Pool hard cap (`CACHE_REDIS_POOL_MAX`, default 20)
    pub pool_max: u32,
    /// Connect/read time budget (`CACHE_REDIS_TIMEOUT`, default 30 s)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Delay between retry attempts (`CACHE_REDIS_RETRY_DELAY`, default
    /// 100 ms)
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
            pool_min: 5,
            pool_max: 20,
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl RedisConfig {
    /// Load remote backend settings from the environment.
    ///
    /// # Errors
    /// [`ConfigError::InvalidPoolBounds`] when `pool_min > pool_max`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env_string("CACHE_REDIS_HOST", &defaults.host),
            port: env_parse("CACHE_REDIS_PORT", defaults.port),
            password: std::env::var("CACHE_REDIS_PASSWORD").ok(),
            database: env_parse("CACHE_REDIS_DATABASE", defaults.database),
            pool_min: env_parse("CACHE_REDIS_POOL_MIN", defaults.pool_min),
            pool_max: env_parse("CACHE_REDIS_POOL_MAX", defaults.pool_max),
            timeout: Duration::from_secs(env_parse("CACHE_REDIS_TIMEOUT", 30u64)),
            retry_delay: Duration::from_millis(env_parse("CACHE_REDIS_RETRY_DELAY", 100u64)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforce construction-time invariants.
    ///
    /// # Errors
    /// [`ConfigError::InvalidPoolBounds`] when `pool_min > pool_max`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_min > self.pool_max {
            return Err(ConfigError::InvalidPoolBounds {
                min: self.pool_min,
                max: self.pool_max,
            });
        }
        Ok(())
    }

    /// Connection URL for the configured server
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}
