//! The synchronous in-memory store.

use cache_config::MemoryConfig;
use cache_core::{epoch_secs, CacheError, CacheResult, Entry, METADATA_OVERHEAD};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A stored entry plus its LRU stamp.
///
/// The stamp comes from a per-store monotonic counter bumped on insert and
/// on every hit, so eviction order is exact even when several accesses land
/// in the same wall-clock second; ties degenerate to insertion order.
#[derive(Debug)]
struct Slot {
    entry: Entry,
    stamp: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct StoreInner {
    entries: HashMap<String, Slot>,
    current_bytes: u64,
    last_cleanup: u64,
    clock: u64,
    counters: Counters,
}

impl StoreInner {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove_entry(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key).map(|slot| {
            self.current_bytes = self.current_bytes.saturating_sub(slot.entry.size);
            slot.entry
        })
    }

    /// Drop every entry with `expires_at <= now`; returns the count.
    fn sweep_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_entry(key);
        }
        expired.len()
    }
}

/// Point-in-time statistics snapshot for a [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Live entry count (including not-yet-swept expired entries)
    pub entries: usize,
    /// Accounted bytes in use
    pub bytes_used: u64,
    /// Configured byte budget
    pub max_size: u64,
    /// Reads that found an unexpired entry
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Entries removed by LRU eviction
    pub evictions: u64,
}

/// Thread-safe process-local cache with TTL and LRU eviction.
///
/// All state sits behind a single mutex; operations are short and never
/// block on I/O. Size accounting is
/// `len(key) + len(value) + METADATA_OVERHEAD` per entry against a hard
/// byte budget.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    max_size: u64,
    cleanup_interval: u64,
}

impl MemoryStore {
    /// Create a store with an explicit byte budget and sweep interval
    #[must_use]
    pub fn new(max_size: u64, cleanup_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                current_bytes: 0,
                last_cleanup: epoch_secs(),
                clock: 0,
                counters: Counters::default(),
            }),
            max_size,
            cleanup_interval: cleanup_interval.as_secs(),
        }
    }

    /// Create a store from a [`MemoryConfig`]
    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_size, config.cleanup_interval)
    }

    /// The configured byte budget
    #[must_use]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Fetch a value; `None` for absent or expired keys. An expired entry
    /// is removed before returning. A hit bumps `accessed_at` and
    /// `access_count` atomically with the read.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = epoch_secs();
        let mut inner = self.inner.lock();
        self.maybe_sweep(&mut inner, now);

        let state = inner.entries.get(key).map(|slot| slot.entry.is_expired(now));
        match state {
            Some(true) => {
                inner.remove_entry(key);
                inner.counters.misses += 1;
                None
            }
            Some(false) => {
                let stamp = inner.next_stamp();
                let value = inner.entries.get_mut(key).map(|slot| {
                    slot.entry.touch(now);
                    slot.stamp = stamp;
                    slot.entry.value.clone()
                });
                inner.counters.hits += 1;
                value
            }
            None => {
                inner.counters.misses += 1;
                None
            }
        }
    }

    /// Store a value, overwriting any existing entry. A `ttl_seconds` of
    /// zero means no expiry. Evicts least-recently-used entries first when
    /// the insertion would exceed the budget.
    pub fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) {
        let now = epoch_secs();
        let entry = Entry::new(value.to_vec(), key.len(), ttl_seconds);
        let mut inner = self.inner.lock();
        self.maybe_sweep(&mut inner, now);

        // Overwrite frees the old entry's bytes before the budget check.
        inner.remove_entry(key);
        if inner.current_bytes + entry.size > self.max_size {
            self.evict(&mut inner, entry.size);
        }

        inner.current_bytes += entry.size;
        let stamp = inner.next_stamp();
        inner.entries.insert(key.to_string(), Slot { entry, stamp });
    }

    /// Store only if the key is absent (or expired). Atomic under the
    /// store mutex. Returns `true` iff this call created the entry.
    pub fn add(&self, key: &str, value: &[u8], ttl_seconds: u64) -> bool {
        let now = epoch_secs();
        let entry = Entry::new(value.to_vec(), key.len(), ttl_seconds);
        let mut inner = self.inner.lock();

        let occupied = inner
            .entries
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired(now));
        if occupied {
            return false;
        }

        // Only an expired leftover can be present here; drop it first.
        inner.remove_entry(key);
        if inner.current_bytes + entry.size > self.max_size {
            self.evict(&mut inner, entry.size);
        }
        inner.current_bytes += entry.size;
        let stamp = inner.next_stamp();
        inner.entries.insert(key.to_string(), Slot { entry, stamp });
        true
    }

    /// Remove a key; `true` iff an entry existed
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove_entry(key).is_some()
    }

    /// Whether the key holds an unexpired entry; delegates to [`Self::get`]
    /// semantics, so lazy expiry applies
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop all entries atomically
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_bytes = 0;
    }

    /// Atomically add `delta` to the numeric value under `key`. An absent
    /// (or expired) entry starts from zero; the result is stored as ASCII
    /// decimal with the surviving entry's expiry metadata preserved.
    ///
    /// # Errors
    /// [`CacheError::TypeMismatch`] when the existing value is non-numeric.
    pub fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = epoch_secs();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let current = match inner.entries.get(key) {
            Some(slot) if !slot.entry.is_expired(now) => {
                let text = std::str::from_utf8(&slot.entry.value)
                    .map_err(|_| CacheError::TypeMismatch { key: key.to_string() })?;
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| CacheError::TypeMismatch { key: key.to_string() })?
            }
            _ => 0,
        };

        let updated = current + delta;
        let rendered = updated.to_string().into_bytes();

        if let Some(slot) = inner.entries.get_mut(key) {
            if !slot.entry.is_expired(now) {
                let new_size =
                    key.len() as u64 + rendered.len() as u64 + METADATA_OVERHEAD;
                let old_size = slot.entry.size;
                slot.entry.value = rendered;
                slot.entry.size = new_size;
                inner.current_bytes = inner.current_bytes - old_size + new_size;
                return Ok(updated);
            }
        }

        let entry = Entry::new(rendered, key.len(), 0);
        inner.remove_entry(key);
        inner.current_bytes += entry.size;
        let stamp = inner.next_stamp();
        inner.entries.insert(key.to_string(), Slot { entry, stamp });
        Ok(updated)
    }

    /// `increment` with a negated delta
    ///
    /// # Errors
    /// Same as [`Self::increment`].
    pub fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.increment(key, -delta)
    }

    /// Batched get; the result mirrors the request order with `None` for
    /// absent keys
    pub fn get_multiple(&self, keys: &[&str]) -> Vec<Option<Vec<u8>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Batched set with a shared TTL; returns the number stored
    pub fn set_multiple(&self, entries: &[(&str, &[u8])], ttl_seconds: u64) -> usize {
        for (key, value) in entries {
            self.set(key, value, ttl_seconds);
        }
        entries.len()
    }

    /// Batched delete; returns how many entries existed
    pub fn delete_multiple(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Reset the TTL of an existing unexpired entry; `ttl_seconds` of zero
    /// removes the expiry. Returns `false` when the key is absent or
    /// expired.
    pub fn touch(&self, key: &str, ttl_seconds: u64) -> bool {
        let now = epoch_secs();
        let mut inner = self.inner.lock();

        let state = inner.entries.get(key).map(|slot| slot.entry.is_expired(now));
        match state {
            Some(true) => {
                inner.remove_entry(key);
                false
            }
            Some(false) => {
                if let Some(slot) = inner.entries.get_mut(key) {
                    slot.entry.expires_at = (ttl_seconds > 0).then(|| now + ttl_seconds);
                }
                true
            }
            None => false,
        }
    }

    /// Number of unexpired entries
    #[must_use]
    pub fn count(&self) -> usize {
        let now = epoch_secs();
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .filter(|slot| !slot.entry.is_expired(now))
            .count()
    }

    /// Sweep every expired entry; returns the number reclaimed
    pub fn cleanup(&self) -> usize {
        let now = epoch_secs();
        let mut inner = self.inner.lock();
        let reclaimed = inner.sweep_expired(now);
        inner.last_cleanup = now;
        reclaimed
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();
        MemoryStats {
            entries: inner.entries.len(),
            bytes_used: inner.current_bytes,
            max_size: self.max_size,
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
        }
    }

    /// Synchronous periodic sweep, piggybacked on get/set
    fn maybe_sweep(&self, inner: &mut StoreInner, now: u64) {
        if now.saturating_sub(inner.last_cleanup) >= self.cleanup_interval {
            let reclaimed = inner.sweep_expired(now);
            inner.last_cleanup = now;
            if reclaimed > 0 {
                debug!(reclaimed, "Periodic sweep reclaimed expired entries");
            }
        }
    }

    /// Evict least-recently-used entries in batches of
    /// `max(1, ceil(0.10 * len))` until at least `needed` bytes are free
    /// under the budget.
    fn evict(&self, inner: &mut StoreInner, needed: u64) {
        while !inner.entries.is_empty()
            && inner.current_bytes + needed > self.max_size
        {
            let mut ordered: Vec<(String, u64)> = inner
                .entries
                .iter()
                .map(|(key, slot)| (key.clone(), slot.stamp))
                .collect();
            ordered.sort_by_key(|(_, stamp)| *stamp);

            let batch = ((ordered.len() + 9) / 10).max(1);
            for (key, _) in ordered.into_iter().take(batch) {
                inner.remove_entry(&key);
                inner.counters.evictions += 1;
            }
            debug!(batch, remaining = inner.entries.len(), "LRU eviction batch");
        }
    }
}
