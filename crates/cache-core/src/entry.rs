//! The internal record stored for one cache key.

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed per-entry metadata overhead, in bytes, counted toward the memory
/// budget alongside key and value lengths. The constant keeps size
/// accounting reproducible across platforms.
pub const METADATA_OVERHEAD: u64 = 1024;

/// Current wall-clock time as seconds since the Unix epoch
#[must_use]
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single cache entry with its bookkeeping metadata.
///
/// Invariant: `created_at <= accessed_at`. A read that observes
/// `now >= expires_at` must treat the entry as absent and remove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored payload
    pub value: Vec<u8>,
    /// Creation timestamp, seconds since epoch
    pub created_at: u64,
    /// Last-access timestamp, seconds since epoch
    pub accessed_at: u64,
    /// Number of reads that hit this entry
    pub access_count: u64,
    /// Accounted size: key length + value length + [`METADATA_OVERHEAD`]
    pub size: u64,
    /// Absolute expiry, seconds since epoch; `None` means the entry never
    /// expires
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Build an entry for `value` stored under a key of `key_len` bytes.
    /// A `ttl_seconds` of zero means no expiry.
    #[must_use]
    pub fn new(value: Vec<u8>, key_len: usize, ttl_seconds: u64) -> Self {
        let now = epoch_secs();
        let size = key_len as u64 + value.len() as u64 + METADATA_OVERHEAD;
        Self {
            value,
            created_at: now,
            accessed_at: now,
            access_count: 0,
            size,
            expires_at: (ttl_seconds > 0).then(|| now + ttl_seconds),
        }
    }

    /// Whether the entry has expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Record a read hit: bump `accessed_at` and `access_count`
    pub fn touch(&mut self, now: u64) {
        self.accessed_at = now.max(self.created_at);
        self.access_count += 1;
    }

    /// Remaining TTL in seconds, if the entry expires
    #[must_use]
    pub fn remaining_ttl(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|deadline| deadline.saturating_sub(now))
    }
}
