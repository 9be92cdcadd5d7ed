//! Engine selection with cached availability.

use cache_core::{CacheEngine, CacheError, CacheKey, CacheResult, PerformanceLevel};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};

struct RegisteredEngine {
    name: String,
    level: PerformanceLevel,
    engine: Arc<dyn CacheEngine>,
}

/// Measured throughput for one engine
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// Engine name
    pub engine: String,
    /// Completed operations (set + get + delete) per second
    pub ops_per_second: f64,
    /// Cycles that were run
    pub cycles: u64,
}

/// Registry and selector over the registered engines.
///
/// Availability answers are cached until an explicit
/// [`EngineSelector::refresh`], so a flapping backend does not get probed
/// on every call.
pub struct EngineSelector {
    engines: RwLock<Vec<RegisteredEngine>>,
    availability: AsyncRwLock<HashMap<String, bool>>,
    preferred: Option<String>,
}

impl EngineSelector {
    /// An empty selector. `preferred` names the engine to favor whenever
    /// it is available; `None` ranks purely by performance level.
    #[must_use]
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            engines: RwLock::new(Vec::new()),
            availability: AsyncRwLock::new(HashMap::new()),
            preferred,
        }
    }

    /// Register an engine under its own reported name and level
    pub fn register(&self, engine: Arc<dyn CacheEngine>) {
        let name = engine.name().to_string();
        let level = engine.performance_level();
        info!(engine = %name, level = level.get(), "Engine registered");
        self.engines.write().push(RegisteredEngine {
            name,
            level,
            engine,
        });
    }

    /// Names of all registered engines, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.engines.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Fetch a registered engine by name
    #[must_use]
    pub fn engine(&self, name: &str) -> Option<Arc<dyn CacheEngine>> {
        self.engines
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.engine))
    }

    /// Drop every registration and cached availability answer
    pub async fn shutdown(&self) {
        self.engines.write().clear();
        self.availability.write().await.clear();
        debug!("Engine selector shut down");
    }

    /// Re-probe every engine's availability, replacing the cache
    pub async fn refresh(&self) {
        let probes: Vec<(String, Arc<dyn CacheEngine>)> = self
            .engines
            .read()
            .iter()
            .map(|e| (e.name.clone(), Arc::clone(&e.engine)))
            .collect();

        let mut fresh = HashMap::with_capacity(probes.len());
        for (name, engine) in probes {
            let available = engine.is_available().await;
            if !available {
                warn!(engine = %name, "Engine reported unavailable");
            }
            fresh.insert(name, available);
        }
        *self.availability.write().await = fresh;
    }

    /// Cached availability for `name`, probing once on a cold cache
    pub async fn is_available(&self, name: &str) -> bool {
        if let Some(&cached) = self.availability.read().await.get(name) {
            return cached;
        }

        let Some(engine) = self.engine(name) else {
            return false;
        };
        let available = engine.is_available().await;
        self.availability
            .write()
            .await
            .insert(name.to_string(), available);
        available
    }

    /// The best engine for the next call: the preferred engine when it is
    /// available, otherwise the available engine with the highest
    /// performance level (ties broken alphabetically by name).
    ///
    /// # Errors
    /// [`CacheError::EngineUnavailable`] when nothing is available.
    pub async fn best(&self) -> CacheResult<Arc<dyn CacheEngine>> {
        if let Some(preferred) = self.preferred.clone() {
            if self.is_available(&preferred).await {
                if let Some(engine) = self.engine(&preferred) {
                    return Ok(engine);
                }
            }
        }

        let candidates: Vec<(String, PerformanceLevel, Arc<dyn CacheEngine>)> = self
            .engines
            .read()
            .iter()
            .map(|e| (e.name.clone(), e.level, Arc::clone(&e.engine)))
            .collect();

        let mut best: Option<(String, PerformanceLevel, Arc<dyn CacheEngine>)> = None;
        for (name, level, engine) in candidates {
            if !self.is_available(&name).await {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_name, best_level, _)) => {
                    level > *best_level || (level == *best_level && name < *best_name)
                }
            };
            if better {
                best = Some((name, level, engine));
            }
        }

        best.map(|(_, _, engine)| engine)
            .ok_or_else(|| CacheError::engine_unavailable("all"))
    }

    /// Time `cycles` set/get/delete rounds against every available engine
    /// and report ops/second per engine.
    pub async fn benchmark(&self, cycles: u64) -> Vec<BenchmarkReport> {
        let engines: Vec<(String, Arc<dyn CacheEngine>)> = self
            .engines
            .read()
            .iter()
            .map(|e| (e.name.clone(), Arc::clone(&e.engine)))
            .collect();

        let mut reports = Vec::new();
        for (name, engine) in engines {
            if !self.is_available(&name).await {
                continue;
            }

            let started = Instant::now();
            let mut completed = 0u64;
            for i in 0..cycles {
                let Ok(key) = CacheKey::new(format!("bench.{name}.{i}")) else {
                    continue;
                };
                if engine.set(&key, b"benchmark", 60).await.is_ok() {
                    completed += 1;
                }
                if engine.get(&key).await.is_ok() {
                    completed += 1;
                }
                if engine.delete(&key).await.is_ok() {
                    completed += 1;
                }
            }

            let elapsed = started.elapsed().as_secs_f64();
            let ops_per_second = if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                completed as f64
            };
            debug!(engine = %name, ops_per_second, "Benchmark finished");
            reports.push(BenchmarkReport {
                engine: name,
                ops_per_second,
                cycles,
            });
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cache_config::MemoryConfig;
    use cache_memory::MemoryEngine;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Wraps the memory engine with a controllable name/level/availability.
    struct FlaggedEngine {
        name: &'static str,
        level: u8,
        available: AtomicBool,
        inner: MemoryEngine,
    }

    impl FlaggedEngine {
        fn new(name: &'static str, level: u8, available: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                level,
                available: AtomicBool::new(available),
                inner: MemoryEngine::new(&MemoryConfig::default()),
            })
        }
    }

    #[async_trait]
    impl CacheEngine for FlaggedEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        fn performance_level(&self) -> PerformanceLevel {
            PerformanceLevel::new(self.level)
        }

        async fn is_available(&self) -> bool {
            self.available.load(Ordering::Acquire)
        }

        async fn ping(&self) -> CacheResult<()> {
            self.inner.ping().await
        }

        async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &CacheKey, value: &[u8], ttl: u64) -> CacheResult<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn add(&self, key: &CacheKey, value: &[u8], ttl: u64) -> CacheResult<bool> {
            self.inner.add(key, value, ttl).await
        }

        async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
            self.inner.exists(key).await
        }

        async fn clear(&self) -> CacheResult<()> {
            self.inner.clear().await
        }

        async fn increment(&self, key: &CacheKey, delta: i64) -> CacheResult<i64> {
            self.inner.increment(key, delta).await
        }

        async fn get_multiple(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>> {
            self.inner.get_multiple(keys).await
        }

        async fn set_multiple(
            &self,
            entries: &[(CacheKey, Vec<u8>)],
            ttl: u64,
        ) -> CacheResult<usize> {
            self.inner.set_multiple(entries, ttl).await
        }

        async fn delete_multiple(&self, keys: &[CacheKey]) -> CacheResult<usize> {
            self.inner.delete_multiple(keys).await
        }

        async fn touch(&self, key: &CacheKey, ttl: u64) -> CacheResult<bool> {
            self.inner.touch(key, ttl).await
        }

        async fn count(&self) -> CacheResult<usize> {
            self.inner.count().await
        }

        async fn cleanup(&self) -> CacheResult<usize> {
            self.inner.cleanup().await
        }
    }

    #[tokio::test]
    async fn preferred_engine_wins_when_available() {
        let selector = EngineSelector::new(Some("slowpoke".to_string()));
        selector.register(FlaggedEngine::new("fast", 4, true));
        selector.register(FlaggedEngine::new("slowpoke", 1, true));

        assert_eq!(selector.best().await.unwrap().name(), "slowpoke");
    }

    #[tokio::test]
    async fn ranking_falls_back_to_highest_level() {
        let selector = EngineSelector::new(Some("gone".to_string()));
        selector.register(FlaggedEngine::new("gone", 4, false));
        selector.register(FlaggedEngine::new("disk", 2, true));
        selector.register(FlaggedEngine::new("wire", 3, true));

        assert_eq!(selector.best().await.unwrap().name(), "wire");
    }

    #[tokio::test]
    async fn level_ties_break_alphabetically() {
        let selector = EngineSelector::new(None);
        selector.register(FlaggedEngine::new("zeta", 3, true));
        selector.register(FlaggedEngine::new("alpha", 3, true));

        assert_eq!(selector.best().await.unwrap().name(), "alpha");
    }

    #[tokio::test]
    async fn all_unavailable_is_an_error() {
        let selector = EngineSelector::new(None);
        selector.register(FlaggedEngine::new("a", 4, false));
        selector.register(FlaggedEngine::new("b", 2, false));

        assert!(matches!(
            selector.best().await,
            Err(CacheError::EngineUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn availability_is_cached_until_refresh() {
        let selector = EngineSelector::new(None);
        let engine = FlaggedEngine::new("flappy", 3, true);
        selector.register(Arc::clone(&engine) as Arc<dyn CacheEngine>);

        assert!(selector.is_available("flappy").await);

        // The engine goes down, but the cached answer stands…
        engine.available.store(false, Ordering::Release);
        assert!(selector.is_available("flappy").await);

        // …until an explicit refresh.
        selector.refresh().await;
        assert!(!selector.is_available("flappy").await);
    }

    #[tokio::test]
    async fn benchmark_reports_available_engines_only() {
        let selector = EngineSelector::new(None);
        selector.register(FlaggedEngine::new("up", 4, true));
        selector.register(FlaggedEngine::new("down", 3, false));

        let reports = selector.benchmark(10).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].engine, "up");
        assert!(reports[0].ops_per_second > 0.0);
    }

    #[tokio::test]
    async fn shutdown_empties_the_registry() {
        let selector = EngineSelector::new(None);
        selector.register(FlaggedEngine::new("x", 3, true));
        selector.shutdown().await;
        assert!(selector.names().is_empty());
        assert!(selector.best().await.is_err());
    }
}
