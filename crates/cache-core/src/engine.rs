//! The engine contract shared by every cache backend.

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use async_trait::async_trait;

/// Static speed ranking of an engine, 1 (slowest) to 4 (fastest).
///
/// The selector prefers higher levels when the configured engine is
/// unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PerformanceLevel(u8);

impl PerformanceLevel {
    /// Slowest tier
    pub const MIN: Self = Self(1);
    /// Fastest tier
    pub const MAX: Self = Self(4);

    /// Build a level, clamped into `1..=4`
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 4))
    }

    /// The raw level value
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Outcome of a cache read, as a closed sum.
///
/// Backends report faults as errors; the facade maps [`Lookup::Error`] to
/// its soft-fail policy instead of letting the fault escape to callers.
#[derive(Debug)]
pub enum Lookup {
    /// The key was present and unexpired
    Hit(Vec<u8>),
    /// The key was absent or expired
    Miss,
    /// The engine faulted while answering
    Error(CacheError),
}

impl Lookup {
    /// The hit value, discarding miss/error distinctions
    #[must_use]
    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Error(_) => None,
        }
    }

    /// Whether this lookup found a value
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

impl From<CacheResult<Option<Vec<u8>>>> for Lookup {
    fn from(result: CacheResult<Option<Vec<u8>>>) -> Self {
        match result {
            Ok(Some(value)) => Self::Hit(value),
            Ok(None) => Self::Miss,
            Err(err) => Self::Error(err),
        }
    }
}

/// The uniform key/value contract implemented by every backend.
///
/// TTLs are expressed in seconds; a TTL of zero means the entry never
/// expires. Engines are immutable once constructed and are composed behind
/// the selector rather than swapped at runtime.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Engine name used for registration, logging, and statistics
    fn name(&self) -> &'static str;

    /// Static speed ranking used by the selector
    fn performance_level(&self) -> PerformanceLevel;

    /// Whether the engine can currently serve requests.
    ///
    /// The selector caches this answer until an explicit refresh.
    async fn is_available(&self) -> bool;

    /// Active health probe; distinct from [`Self::is_available`] in that it
    /// must reach the backing store
    async fn ping(&self) -> CacheResult<()>;

    /// Fetch a value. Returns `None` for absent or expired keys; an expired
    /// entry is removed before returning.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any existing entry
    async fn set(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<()>;

    /// Store a value only if the key is absent. Atomic on every engine:
    /// exactly one of any set of concurrent `add` calls for a key wins.
    async fn add(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<bool>;

    /// Remove a key. Returns `true` iff an entry existed.
    async fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Whether the key currently holds an unexpired entry (lazy expiry
    /// applies, same as [`Self::get`])
    async fn exists(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Drop all entries
    async fn clear(&self) -> CacheResult<()>;

    /// Atomically add `delta` to the numeric value under `key`, treating an
    /// absent entry as zero. The result is stored as ASCII decimal.
    ///
    /// # Errors
    /// [`CacheError::TypeMismatch`] if an existing value is non-numeric.
    async fn increment(&self, key: &CacheKey, delta: i64) -> CacheResult<i64>;

    /// Fetch several keys at once. The result vector mirrors the request
    /// order; absent or failing keys are `None`.
    async fn get_multiple(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Store several entries with a shared TTL. Returns the number of
    /// entries actually stored; partial failure is reported by the count.
    async fn set_multiple(
        &self,
        entries: &[(CacheKey, Vec<u8>)],
        ttl_seconds: u64,
    ) -> CacheResult<usize>;

    /// Remove several keys, returning how many existed
    async fn delete_multiple(&self, keys: &[CacheKey]) -> CacheResult<usize>;

    /// Reset the TTL of an existing entry. Returns `false` if the key is
    /// absent or expired.
    async fn touch(&self, key: &CacheKey, ttl_seconds: u64) -> CacheResult<bool>;

    /// Number of live entries
    async fn count(&self) -> CacheResult<usize>;

    /// Sweep expired entries, returning how many were reclaimed
    async fn cleanup(&self) -> CacheResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_level_clamps() {
        assert_eq!(PerformanceLevel::new(0), PerformanceLevel::MIN);
        assert_eq!(PerformanceLevel::new(9), PerformanceLevel::MAX);
        assert!(PerformanceLevel::new(2) < PerformanceLevel::new(3));
    }

    #[test]
    fn lookup_from_result() {
        assert!(Lookup::from(Ok(Some(b"v".to_vec()))).is_hit());
        assert!(!Lookup::from(Ok(None)).is_hit());

        let lookup = Lookup::from(Err(CacheError::engine_unavailable("remote")));
        assert!(matches!(lookup, Lookup::Error(_)));
        assert!(lookup.into_option().is_none());
    }
}
