//! The session handler protocol and its lock layer.

use crate::sid::validate_id;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cache_core::epoch_secs;
use cache_facade::Cache;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Interval between lock acquisition attempts
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A persisted session. `created_at` survives rewrites of the same
/// session id; the payload travels base64-wrapped so the record stays
/// valid JSON for any byte content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    data: String,
    /// First write timestamp, epoch seconds
    pub created_at: u64,
    /// Most recent write timestamp, epoch seconds
    pub updated_at: u64,
    /// Client address recorded at write time
    pub ip_address: Option<String>,
    /// Client user agent recorded at write time
    pub user_agent: Option<String>,
}

impl SessionRecord {
    /// A fresh record carrying `data`
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        let now = epoch_secs();
        Self {
            data: BASE64.encode(data),
            created_at: now,
            updated_at: now,
            ip_address: None,
            user_agent: None,
        }
    }

    /// The session payload
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        BASE64.decode(&self.data).unwrap_or_default()
    }
}

/// Session persistence over the cache facade.
///
/// Consumed by the surrounding runtime's session machinery through the
/// handler protocol (`open`/`close`/`read`/`write`/`destroy`/`gc`/
/// `update_timestamp`/`validate_id`/`create_sid`).
pub struct SessionHandler {
    cache: Arc<Cache>,
    session_ttl: Duration,
    lock_timeout: Duration,
    // Locks this handler owns, sid -> acquisition epoch seconds. GC sweeps
    // entries older than the lock timeout.
    held_locks: DashMap<String, u64>,
}

impl SessionHandler {
    /// Build a handler with the given session lifetime and lock timeout
    #[must_use]
    pub fn new(cache: Arc<Cache>, session_ttl: Duration, lock_timeout: Duration) -> Self {
        Self {
            cache,
            session_ttl,
            lock_timeout,
            held_locks: DashMap::new(),
        }
    }

    /// Defaults: 1440 s session lifetime, 30 s lock timeout
    #[must_use]
    pub fn with_defaults(cache: Arc<Cache>) -> Self {
        Self::new(cache, Duration::from_secs(1440), Duration::from_secs(30))
    }

    // The canonical lock/data key templates use '.' separators; ':' is
    // excluded by key validation.
    fn lock_key(sid: &str) -> String {
        format!("sess.lock.{sid}")
    }

    fn data_key(sid: &str) -> String {
        format!("sess.data.{sid}")
    }

    /// Acquire the exclusive session lock, retrying every 100 ms until
    /// `timeout` elapses. The lock entry's TTL equals `timeout`, so an
    /// abandoned owner's lock reclaims itself.
    ///
    /// Cancellation-safe: there is no suspension point between a winning
    /// `add` and the return, so a cancelled call never strands a lock it
    /// acquired.
    pub async fn lock(&self, sid: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let key = Self::lock_key(sid);

        loop {
            let now = epoch_secs();
            let acquired = self
                .cache
                .add(&key, now.to_string().as_bytes(), Some(timeout))
                .await
                .unwrap_or(false);
            if acquired {
                self.held_locks.insert(sid.to_string(), now);
                debug!(sid = %sid, "Session lock acquired");
                return true;
            }

            if Instant::now() + LOCK_RETRY_INTERVAL > deadline {
                debug!(sid = %sid, "Session lock acquisition timed out");
                return false;
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    /// Release the session lock; `true` iff this call removed it
    pub async fn unlock(&self, sid: &str) -> bool {
        self.held_locks.remove(sid);
        self.cache
            .delete(&Self::lock_key(sid))
            .await
            .unwrap_or(false)
    }

    /// Handler protocol: begin a session phase. The storage lives in the
    /// cache, so there is nothing to open; the call always succeeds.
    pub fn open(&self, _path: &str, _name: &str) -> bool {
        true
    }

    /// Handler protocol: end the session phase, releasing every lock this
    /// handler still holds
    pub async fn close(&self) -> bool {
        let held: Vec<String> = self
            .held_locks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for sid in held {
            self.unlock(&sid).await;
        }
        true
    }

    /// Read the session payload. The lock is acquired first; on lock
    /// failure (or an invalid sid) the result is empty.
    pub async fn read(&self, sid: &str) -> Vec<u8> {
        if !validate_id(sid) {
            return Vec::new();
        }
        if !self.lock(sid, self.lock_timeout).await {
            warn!(sid = %sid, "Could not lock session for read");
            return Vec::new();
        }

        self.fetch_record(sid)
            .await
            .map(|record| record.data())
            .unwrap_or_default()
    }

    /// Upsert the session payload, preserving `created_at` from any
    /// existing record
    pub async fn write(&self, sid: &str, data: &[u8]) -> bool {
        if !validate_id(sid) {
            return false;
        }

        let mut record = SessionRecord::new(data);
        if let Some(existing) = self.fetch_record(sid).await {
            record.created_at = existing.created_at;
            record.ip_address = existing.ip_address;
            record.user_agent = existing.user_agent;
        }

        self.store_record(sid, &record).await
    }

    /// Attach client metadata to an existing session record
    pub async fn annotate(
        &self,
        sid: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> bool {
        let Some(mut record) = self.fetch_record(sid).await else {
            return false;
        };
        record.ip_address = ip_address;
        record.user_agent = user_agent;
        self.store_record(sid, &record).await
    }

    /// Remove the session record and its lock
    pub async fn destroy(&self, sid: &str) -> bool {
        let removed = self
            .cache
            .delete(&Self::data_key(sid))
            .await
            .unwrap_or(false);
        self.unlock(sid).await;
        removed
    }

    /// Handler protocol GC. Entry expiry is TTL-driven, so the store needs
    /// no sweep; this releases locally-tracked locks older than the lock
    /// timeout and reports how many it reclaimed.
    pub async fn gc(&self, _max_lifetime: Duration) -> usize {
        let now = epoch_secs();
        let stale: Vec<String> = self
            .held_locks
            .iter()
            .filter(|entry| now.saturating_sub(*entry.value()) > self.lock_timeout.as_secs())
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = 0;
        for sid in stale {
            if self.unlock(&sid).await {
                released += 1;
            }
        }
        debug!(released, "Session GC finished");
        released
    }

    /// Extend the record's TTL without rewriting the payload; falls back
    /// to a full write when the record is gone
    pub async fn update_timestamp(&self, sid: &str, data: &[u8]) -> bool {
        let touched = self
            .cache
            .touch(&Self::data_key(sid), Some(self.session_ttl))
            .await
            .unwrap_or(false);
        if touched {
            return true;
        }
        self.write(sid, data).await
    }

    /// Fetch the decoded record for `sid`, if present and parseable
    async fn fetch_record(&self, sid: &str) -> Option<SessionRecord> {
        let raw = self.cache.get(&Self::data_key(sid)).await.ok()??;
        let decoded = self.cache.serializer().decode(&raw).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    async fn store_record(&self, sid: &str, record: &SessionRecord) -> bool {
        let Ok(serialized) = serde_json::to_vec(record) else {
            return false;
        };
        let Ok(envelope) = self.cache.serializer().encode_best(&serialized) else {
            return false;
        };
        self.cache
            .set(&Self::data_key(sid), &envelope, Some(self.session_ttl))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sid::create_sid;
    use cache_config::MemoryConfig;
    use cache_memory::MemoryEngine;
    use cache_routing::EngineSelector;

    fn handler() -> SessionHandler {
        let selector = Arc::new(EngineSelector::new(None));
        selector.register(Arc::new(MemoryEngine::new(&MemoryConfig::default())));
        SessionHandler::with_defaults(Arc::new(Cache::with_defaults(selector)))
    }

    fn shared_handlers() -> (SessionHandler, SessionHandler) {
        let selector = Arc::new(EngineSelector::new(None));
        selector.register(Arc::new(MemoryEngine::new(&MemoryConfig::default())));
        let cache = Arc::new(Cache::with_defaults(selector));
        (
            SessionHandler::with_defaults(Arc::clone(&cache)),
            SessionHandler::with_defaults(cache),
        )
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let handler = handler();
        let sid = create_sid();

        assert!(handler.write(&sid, b"payload").await);
        assert_eq!(handler.read(&sid).await, b"payload".to_vec());
        handler.close().await;
    }

    #[tokio::test]
    async fn created_at_survives_rewrites() {
        let handler = handler();
        let sid = create_sid();

        assert!(handler.write(&sid, b"first").await);
        let first = handler.fetch_record(&sid).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(handler.write(&sid, b"second").await);
        let second = handler.fetch_record(&sid).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.data(), b"second".to_vec());
    }

    #[tokio::test]
    async fn lock_contention_admits_one_owner() {
        let (a, b) = shared_handlers();
        let sid = create_sid();

        assert!(a.lock(&sid, Duration::from_secs(5)).await);

        let started = Instant::now();
        assert!(!b.lock(&sid, Duration::from_secs(1)).await);
        // The loser gives up no later than timeout plus one retry tick.
        assert!(started.elapsed() < Duration::from_millis(1500));

        assert!(a.unlock(&sid).await);
        assert!(b.lock(&sid, Duration::from_secs(5)).await);
        b.close().await;
    }

    #[tokio::test]
    async fn invalid_sids_read_empty_and_refuse_writes() {
        let handler = handler();
        assert!(handler.read("short").await.is_empty());
        assert!(!handler.write("short", b"data").await);
    }

    #[tokio::test]
    async fn destroy_removes_record_and_lock() {
        let handler = handler();
        let sid = create_sid();

        handler.write(&sid, b"gone soon").await;
        assert!(handler.lock(&sid, Duration::from_secs(5)).await);
        assert!(handler.destroy(&sid).await);
        assert!(handler.read(&sid).await.is_empty());
        handler.close().await;
    }

    #[tokio::test]
    async fn gc_releases_stale_locks_only() {
        let selector = Arc::new(EngineSelector::new(None));
        selector.register(Arc::new(MemoryEngine::new(&MemoryConfig::default())));
        let cache = Arc::new(Cache::with_defaults(selector));
        let handler = SessionHandler::new(
            cache,
            Duration::from_secs(1440),
            Duration::from_secs(0),
        );
        let sid = create_sid();

        assert!(handler.lock(&sid, Duration::from_secs(5)).await);
        // A zero lock timeout makes every held lock immediately stale.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(handler.gc(Duration::from_secs(1440)).await, 1);
        assert_eq!(handler.gc(Duration::from_secs(1440)).await, 0);
    }

    #[tokio::test]
    async fn update_timestamp_upserts_when_record_expired() {
        let handler = handler();
        let sid = create_sid();

        assert!(handler.update_timestamp(&sid, b"recreated").await);
        assert_eq!(handler.read(&sid).await, b"recreated".to_vec());
        handler.close().await;
    }

    #[tokio::test]
    async fn annotate_attaches_client_metadata() {
        let handler = handler();
        let sid = create_sid();

        handler.write(&sid, b"payload").await;
        assert!(
            handler
                .annotate(&sid, Some("203.0.113.9".to_string()), Some("curl/8".to_string()))
                .await
        );

        let record = handler.fetch_record(&sid).await.unwrap();
        assert_eq!(record.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(record.user_agent.as_deref(), Some("curl/8"));
        assert_eq!(record.data(), b"payload".to_vec());
    }

    #[tokio::test]
    async fn open_always_succeeds() {
        let handler = handler();
        assert!(handler.open("/var/lib/sessions", "PHPSESSID"));
    }
}
