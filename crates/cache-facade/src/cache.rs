//! The facade itself.

use crate::stats::{CacheStats, StatsSnapshot};
use cache_config::CacheSettings;
use cache_core::{
    CacheError, CacheKey, CacheResult, Lookup, SerializerRegistry,
};
use cache_routing::EngineSelector;
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The uniform cache contract.
///
/// Every operation validates its key(s) first, asks the selector for the
/// best engine, and dispatches. Engine faults are absorbed: the `errors`
/// counter is bumped, structured context is logged, and the call returns
/// its safe default. Selection failures (no engine available) and invalid
/// keys propagate.
pub struct Cache {
    selector: Arc<EngineSelector>,
    default_ttl: Duration,
    batch_size: usize,
    stats: CacheStats,
    tags: DashMap<String, HashSet<String>>,
    serializer: SerializerRegistry,
}

impl Cache {
    /// Build a facade over `selector` with TTL and batching defaults from
    /// `settings`
    #[must_use]
    pub fn new(selector: Arc<EngineSelector>, settings: &CacheSettings) -> Self {
        Self {
            selector,
            default_ttl: settings.default_ttl,
            batch_size: settings.batch_size.max(1),
            stats: CacheStats::default(),
            tags: DashMap::new(),
            serializer: SerializerRegistry::with_defaults(),
        }
    }

    /// Build with library defaults (3600 s TTL)
    #[must_use]
    pub fn with_defaults(selector: Arc<EngineSelector>) -> Self {
        Self::new(selector, &CacheSettings::default())
    }

    /// The engine selector behind this facade
    #[must_use]
    pub fn selector(&self) -> &Arc<EngineSelector> {
        &self.selector
    }

    /// The payload codec registry, for callers that persist structured
    /// records through the byte contract
    #[must_use]
    pub fn serializer(&self) -> &SerializerRegistry {
        &self.serializer
    }

    /// Current operation counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn ttl_seconds(&self, ttl: Option<Duration>) -> u64 {
        ttl.unwrap_or(self.default_ttl).as_secs()
    }

    fn soft_fail<T>(&self, operation: &str, key: Option<&str>, err: &CacheError, default: T) -> T {
        self.stats.record_error();
        warn!(operation, key = ?key, error = %err, "Engine fault absorbed");
        default
    }

    /// Fetch a value. Engine faults read as miss.
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.get(&key).await {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.stats.record_miss();
                Ok(self.soft_fail("get", Some(key.as_str()), &e, None))
            }
        }
    }

    /// Fetch as the closed [`Lookup`] sum, preserving the fault
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn lookup(&self, key: &str) -> CacheResult<Lookup> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        let lookup = Lookup::from(engine.get(&key).await);
        match &lookup {
            Lookup::Hit(_) => self.stats.record_hit(),
            Lookup::Miss => self.stats.record_miss(),
            Lookup::Error(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Lookup fault");
            }
        }
        Ok(lookup)
    }

    /// Store a value; `None` TTL selects the configured default. Returns
    /// `false` when the engine faulted (the value is not stored).
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.set(&key, value, self.ttl_seconds(ttl)).await {
            Ok(()) => {
                self.stats.record_sets(1);
                Ok(true)
            }
            Err(e) => Ok(self.soft_fail("set", Some(key.as_str()), &e, false)),
        }
    }

    /// Store only if absent; atomic on every engine
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.add(&key, value, self.ttl_seconds(ttl)).await {
            Ok(created) => {
                if created {
                    self.stats.record_sets(1);
                }
                Ok(created)
            }
            Err(e) => Ok(self.soft_fail("add", Some(key.as_str()), &e, false)),
        }
    }

    /// Store only if the key already holds a value
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn replace(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let validated = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.exists(&validated).await {
            Ok(true) => self.set(key, value, ttl).await,
            Ok(false) => Ok(false),
            Err(e) => Ok(self.soft_fail("replace", Some(key), &e, false)),
        }
    }

    /// Remove a key; `true` iff an entry existed
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.delete(&key).await {
            Ok(existed) => {
                if existed {
                    self.stats.record_deletes(1);
                }
                Ok(existed)
            }
            Err(e) => Ok(self.soft_fail("delete", Some(key.as_str()), &e, false)),
        }
    }

    /// Drop everything in the selected engine
    ///
    /// # Errors
    /// Engine-selection failures.
    pub async fn clear(&self) -> CacheResult<bool> {
        let engine = self.selector.best().await?;
        match engine.clear().await {
            Ok(()) => Ok(true),
            Err(e) => Ok(self.soft_fail("clear", None, &e, false)),
        }
    }

    /// Whether `key` holds an unexpired value
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.exists(&key).await {
            Ok(found) => Ok(found),
            Err(e) => Ok(self.soft_fail("has", Some(key.as_str()), &e, false)),
        }
    }

    /// Fetch then remove, in that order
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn pull(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }

    /// Reset an entry's TTL
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn touch(&self, key: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.touch(&key, self.ttl_seconds(ttl)).await {
            Ok(applied) => Ok(applied),
            Err(e) => Ok(self.soft_fail("touch", Some(key.as_str()), &e, false)),
        }
    }

    /// Atomic numeric add; `None` on absorbed engine faults (including
    /// [`CacheError::TypeMismatch`] on non-numeric values)
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn increment(&self, key: &str, delta: i64) -> CacheResult<Option<i64>> {
        let key = CacheKey::new(key)?;
        let engine = self.selector.best().await?;

        match engine.increment(&key, delta).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => Ok(self.soft_fail("increment", Some(key.as_str()), &e, None)),
        }
    }

    /// [`Self::increment`] with a negated delta
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn decrement(&self, key: &str, delta: i64) -> CacheResult<Option<i64>> {
        self.increment(key, -delta).await
    }

    /// Batched fetch; the result mirrors the request order and never fails
    /// wholesale; absent or failing keys are `None`.
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] (any key) and engine-selection failures.
    pub async fn get_multiple(&self, keys: &[&str]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let validated = keys
            .iter()
            .map(|key| CacheKey::new(*key))
            .collect::<CacheResult<Vec<_>>>()?;
        let engine = self.selector.best().await?;

        // Large requests go to the engine in configured-size chunks.
        let mut values = Vec::with_capacity(validated.len());
        for chunk in validated.chunks(self.batch_size) {
            match engine.get_multiple(chunk).await {
                Ok(mut found) => values.append(&mut found),
                Err(e) => {
                    values.extend(std::iter::repeat_with(|| None).take(chunk.len()));
                    self.soft_fail("get_multiple", None, &e, ());
                }
            }
        }

        for value in &values {
            if value.is_some() {
                self.stats.record_hit();
            } else {
                self.stats.record_miss();
            }
        }
        Ok(values)
    }

    /// Batched store with a shared TTL; the count reports only entries the
    /// engine acknowledged, and `sets` advances by exactly that count.
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] (any key) and engine-selection failures.
    pub async fn set_multiple(
        &self,
        entries: &[(&str, &[u8])],
        ttl: Option<Duration>,
    ) -> CacheResult<usize> {
        let validated = entries
            .iter()
            .map(|(key, value)| Ok((CacheKey::new(*key)?, value.to_vec())))
            .collect::<CacheResult<Vec<_>>>()?;
        let engine = self.selector.best().await?;
        let ttl_seconds = self.ttl_seconds(ttl);

        let mut stored = 0;
        for chunk in validated.chunks(self.batch_size) {
            match engine.set_multiple(chunk, ttl_seconds).await {
                Ok(count) => stored += count,
                Err(e) => self.soft_fail("set_multiple", None, &e, ()),
            }
        }

        self.stats.record_sets(stored as u64);
        Ok(stored)
    }

    /// Batched removal; returns how many entries existed
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] (any key) and engine-selection failures.
    pub async fn delete_multiple(&self, keys: &[&str]) -> CacheResult<usize> {
        let validated = keys
            .iter()
            .map(|key| CacheKey::new(*key))
            .collect::<CacheResult<Vec<_>>>()?;
        let engine = self.selector.best().await?;

        let mut removed = 0;
        for chunk in validated.chunks(self.batch_size) {
            match engine.delete_multiple(chunk).await {
                Ok(count) => removed += count,
                Err(e) => self.soft_fail("delete_multiple", None, &e, ()),
            }
        }

        self.stats.record_deletes(removed as u64);
        Ok(removed)
    }

    /// Return the cached value under `key`, or compute, store, and return
    /// it. The computation runs only on a miss.
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn remember<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> CacheResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<u8>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }

        let value = compute().await;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Store a value and index it under each tag for group invalidation.
    /// The tag index is in-process only and does not survive restart.
    ///
    /// # Errors
    /// [`CacheError::InvalidKey`] and engine-selection failures.
    pub async fn set_with_tags(
        &self,
        key: &str,
        value: &[u8],
        tags: &[&str],
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let stored = self.set(key, value, ttl).await?;
        if stored {
            for tag in tags {
                self.tags
                    .entry((*tag).to_string())
                    .or_default()
                    .insert(key.to_string());
            }
        }
        Ok(stored)
    }

    /// Remove every key indexed under any of `tags`; returns how many
    /// entries were deleted
    ///
    /// # Errors
    /// Engine-selection failures.
    pub async fn invalidate_tags(&self, tags: &[&str]) -> CacheResult<usize> {
        let mut keys: HashSet<String> = HashSet::new();
        for tag in tags {
            if let Some((_, tagged)) = self.tags.remove(*tag) {
                keys.extend(tagged);
            }
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.delete_multiple(&refs).await
    }
}
