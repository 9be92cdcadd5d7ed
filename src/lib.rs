//! # HyperCache
//!
//! Multi-backend cache library: a native in-memory LRU+TTL engine (with a
//! stable C ABI in the `cache-ffi` crate), an asynchronous cluster-aware
//! Redis-protocol engine, and a filesystem-backed persistent engine, all
//! behind one validated contract.
//!
//! The [`CacheBuilder`] composes engines from configuration at
//! construction time and registers them with the [`EngineSelector`], which
//! picks the best-available engine per call and falls back transparently:
//!
//! ```no_run
//! # async fn demo() -> hypercache::CacheResult<()> {
//! let cache = hypercache::CacheBuilder::from_env()?.build().await?;
//! cache.set("greeting", b"hello", None).await?;
//! assert_eq!(cache.get("greeting").await?, Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use cache_config::{
    CacheSettings, ConfigError, EnginePreference, FileConfig, MemoryConfig, RedisConfig,
};
pub use cache_core::{
    CacheEngine, CacheError, CacheKey, CacheResult, Entry, Lookup, PerformanceLevel,
    SerializerRegistry,
};
pub use cache_facade::{Cache, StatsSnapshot};
pub use cache_file::FileEngine;
pub use cache_memory::{MemoryEngine, MemoryStore};
pub use cache_remote::{
    ClusterConfig, ClusterRouter, ClusterType, ConnectionPool, NodeDescriptor, NodeRole,
    ReadPreference, RemoteEngine,
};
pub use cache_routing::EngineSelector;
pub use cache_session::{create_sid, validate_id, SessionHandler};

use std::sync::Arc;
use tracing::{info, warn};

/// Composes engines from configuration into a ready [`Cache`].
///
/// Engines are immutable once built; composition happens here, at
/// construction time, and the selector is the sole registry afterwards.
pub struct CacheBuilder {
    settings: CacheSettings,
    memory: Option<MemoryConfig>,
    file: Option<FileConfig>,
    remote: Option<(RedisConfig, ClusterConfig)>,
}

impl CacheBuilder {
    /// Start from explicit top-level settings, with only the memory
    /// engine enabled
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            memory: Some(MemoryConfig::default()),
            file: None,
            remote: None,
        }
    }

    /// Load every configuration area from the environment and enable all
    /// three engines.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] for inverted pool bounds or an
    /// invalid cluster topology, the only fatal-at-construction
    /// conditions.
    pub fn from_env() -> CacheResult<Self> {
        let redis = RedisConfig::from_env()?;
        let cluster = ClusterConfig::from_env()?;

        Ok(Self {
            settings: CacheSettings::from_env(),
            memory: Some(MemoryConfig::from_env()),
            file: Some(FileConfig::from_env()),
            remote: Some((redis, cluster)),
        })
    }

    /// Override the memory engine configuration (`None` disables it)
    #[must_use]
    pub fn memory(mut self, config: Option<MemoryConfig>) -> Self {
        self.memory = config;
        self
    }

    /// Enable the file engine
    #[must_use]
    pub fn file(mut self, config: FileConfig) -> Self {
        self.file = Some(config);
        self
    }

    /// Enable the remote engine
    #[must_use]
    pub fn remote(mut self, redis: RedisConfig, cluster: ClusterConfig) -> Self {
        self.remote = Some((redis, cluster));
        self
    }

    /// Construct the engines, initialize the remote side (pool warm-up,
    /// one-shot discovery, health loop), and return the facade.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] from remote-engine
    /// construction.
    pub async fn build(self) -> CacheResult<Cache> {
        // An explicit CACHE_ENGINE pins the preference; `auto` favors the
        // configured default store and lets ranking take over when it is
        // unavailable.
        let preferred = match &self.settings.engine {
            EnginePreference::Auto => Some(self.settings.default_store.clone()),
            EnginePreference::Named(name) => Some(name.clone()),
        };
        let selector = Arc::new(EngineSelector::new(preferred));

        if let Some(memory) = &self.memory {
            selector.register(Arc::new(MemoryEngine::new(memory)));
        }
        if let Some(file) = &self.file {
            selector.register(Arc::new(FileEngine::new(file)));
        }
        if let Some((redis, cluster)) = self.remote {
            let remote = RemoteEngine::new(redis, cluster)?;
            remote.initialize().await;
            selector.register(Arc::new(remote));
        }

        let names = selector.names();
        if names.is_empty() {
            warn!("No engines configured; every call will fail with EngineUnavailable");
        } else {
            info!(engines = ?names, "Cache composed");
        }

        Ok(Cache::new(selector, &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_only_build_serves_requests() {
        let cache = CacheBuilder::new(CacheSettings::default())
            .build()
            .await
            .unwrap();

        assert!(cache.set("composed", b"ready", None).await.unwrap());
        assert_eq!(
            cache.get("composed").await.unwrap(),
            Some(b"ready".to_vec())
        );
    }

    #[tokio::test]
    async fn empty_build_fails_engine_selection() {
        let cache = CacheBuilder::new(CacheSettings::default())
            .memory(None)
            .build()
            .await
            .unwrap();

        assert!(matches!(
            cache.get("anything").await,
            Err(CacheError::EngineUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn named_preference_flows_into_the_selector() {
        let settings = CacheSettings {
            engine: EnginePreference::Named("memory".to_string()),
            ..Default::default()
        };
        let cache = CacheBuilder::new(settings).build().await.unwrap();
        assert!(cache.set("k", b"v", None).await.unwrap());
    }
}
