//! [`CacheEngine`] adapter over the synchronous store.

use crate::store::MemoryStore;
use async_trait::async_trait;
use cache_config::MemoryConfig;
use cache_core::{CacheEngine, CacheKey, CacheResult, PerformanceLevel};
use std::sync::Arc;

/// The in-process engine. Operations complete without suspending; the
/// async surface exists only to satisfy the shared contract.
pub struct MemoryEngine {
    store: Arc<MemoryStore>,
}

impl MemoryEngine {
    /// Create an engine with a fresh store built from `config`
    #[must_use]
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::from_config(config)),
        }
    }

    /// Wrap an existing store (shared, for example, with the C-ABI layer)
    #[must_use]
    pub fn from_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl CacheEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn performance_level(&self) -> PerformanceLevel {
        PerformanceLevel::MAX
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.store.get(key.as_str()))
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        self.store.set(key.as_str(), value, ttl_seconds);
        Ok(())
    }

    async fn add(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<bool> {
        Ok(self.store.add(key.as_str(), value, ttl_seconds))
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.store.delete(key.as_str()))
    }

    async fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.store.exists(key.as_str()))
    }

    async fn clear(&self) -> CacheResult<()> {
        self.store.clear();
        Ok(())
    }

    async fn increment(&self, key: &CacheKey, delta: i64) -> CacheResult<i64> {
        self.store.increment(key.as_str(), delta)
    }

    async fn get_multiple(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let raw: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        Ok(self.store.get_multiple(&raw))
    }

    async fn set_multiple(
        &self,
        entries: &[(CacheKey, Vec<u8>)],
        ttl_seconds: u64,
    ) -> CacheResult<usize> {
        let raw: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_slice()))
            .collect();
        Ok(self.store.set_multiple(&raw, ttl_seconds))
    }

    async fn delete_multiple(&self, keys: &[CacheKey]) -> CacheResult<usize> {
        let raw: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        Ok(self.store.delete_multiple(&raw))
    }

    async fn touch(&self, key: &CacheKey, ttl_seconds: u64) -> CacheResult<bool> {
        Ok(self.store.touch(key.as_str(), ttl_seconds))
    }

    async fn count(&self) -> CacheResult<usize> {
        Ok(self.store.count())
    }

    async fn cleanup(&self) -> CacheResult<usize> {
        Ok(self.store.cleanup())
    }
}
