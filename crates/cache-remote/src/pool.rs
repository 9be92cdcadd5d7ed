//! Connection pool for the remote engine.
//!
//! Two idle collections back the pool: a shared list used when cluster
//! routing is off, and a per-node map keyed `host:port` for routed
//! acquisition. Bounds are `[pool_min, pool_max]`; warm-up tries to reach
//! `pool_min` at construction, and the total live-connection count never
//! exceeds `pool_max`.

use cache_config::RedisConfig;
use cache_core::{epoch_secs, CacheError, CacheResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Releases a pool slot when the owning connection is dropped. Dropping a
/// lent connection anywhere (including on task cancellation) returns its
/// slot, so the total count cannot leak.
struct SlotGuard {
    total: Arc<AtomicU32>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.total.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A connection on loan from the pool.
///
/// While held, the caller has exclusive use; hand it back through
/// [`ConnectionPool::release`] (healthy path) or let it drop after an
/// unrecoverable fault.
pub struct PooledConnection {
    pub(crate) conn: redis::aio::Connection,
    node: Option<String>,
    created_at: u64,
    _slot: SlotGuard,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("node", &self.node)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl PooledConnection {
    /// The `host:port` this connection is pinned to, if routed
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Epoch seconds when the connection was established
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Bounded pool of Redis connections.
pub struct ConnectionPool {
    config: RedisConfig,
    shared: Mutex<Vec<PooledConnection>>,
    per_node: Mutex<HashMap<String, Vec<PooledConnection>>>,
    total: Arc<AtomicU32>,
}

impl ConnectionPool {
    /// Build a pool. Bounds are validated here; `pool_min > pool_max` is
    /// rejected.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] on inverted bounds.
    pub fn new(config: RedisConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Mutex::new(Vec::new()),
            per_node: Mutex::new(HashMap::new()),
            total: Arc::new(AtomicU32::new(0)),
        })
    }

    /// The pool configuration
    #[must_use]
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Live connections (idle + on loan)
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total.load(Ordering::Acquire)
    }

    /// Idle connections currently parked in the shared pool
    pub async fn idle_count(&self) -> usize {
        self.shared.lock().await.len()
    }

    /// Try to populate the shared pool up to `pool_min`. Failures are
    /// logged and skipped; warm-up is best-effort.
    pub async fn warm_up(&self) {
        let url = self.config.url();
        for _ in 0..self.config.pool_min {
            match self.open_counted(&url, None).await {
                Ok(conn) => self.shared.lock().await.push(conn),
                Err(e) => {
                    warn!(error = %e, "Warm-up connection failed");
                    break;
                }
            }
        }
        debug!(
            idle = self.shared.lock().await.len(),
            target = self.config.pool_min,
            "Pool warm-up finished"
        );
    }

    /// Acquire from the shared pool: a pinged-healthy idle connection if
    /// one exists, else a new connection while under `pool_max`.
    ///
    /// # Errors
    /// [`CacheError::PoolExhausted`] at capacity;
    /// [`CacheError::ConnectionFailed`] / [`CacheError::Timeout`] when a
    /// fresh connection cannot be established.
    pub async fn acquire(&self) -> CacheResult<PooledConnection> {
        loop {
            let candidate = self.shared.lock().await.pop();
            let Some(mut conn) = candidate else { break };

            if self.ping(&mut conn).await {
                return Ok(conn);
            }
            drop(conn);
        }

        self.open_counted(&self.config.url(), None).await
    }

    /// Acquire a connection pinned to `addr` (`host:port`), drawing from
    /// that node's idle list first.
    ///
    /// # Errors
    /// Same as [`Self::acquire`].
    pub async fn acquire_for_node(&self, addr: &str) -> CacheResult<PooledConnection> {
        loop {
            let candidate = {
                let mut per_node = self.per_node.lock().await;
                per_node.get_mut(addr).and_then(Vec::pop)
            };
            let Some(mut conn) = candidate else { break };

            if self.ping(&mut conn).await {
                return Ok(conn);
            }
            drop(conn);
        }

        self.open_counted(&self.node_url(addr), Some(addr.to_string()))
            .await
    }

    /// Return a connection to the pool. The connection is health-probed
    /// first; unhealthy connections are destroyed, and the idle lists are
    /// trimmed to `pool_max`.
    pub async fn release(&self, mut conn: PooledConnection) {
        if !self.ping(&mut conn).await {
            debug!(node = ?conn.node(), "Released connection failed probe, destroying");
            drop(conn);
            return;
        }

        let cap = self.config.pool_max as usize;
        match conn.node.clone() {
            Some(addr) => {
                let mut per_node = self.per_node.lock().await;
                let idle = per_node.entry(addr).or_default();
                if idle.len() < cap {
                    idle.push(conn);
                }
            }
            None => {
                let mut shared = self.shared.lock().await;
                if shared.len() < cap {
                    shared.push(conn);
                }
            }
        }
    }

    /// Destroy a connection explicitly. Dropping has the same effect; the
    /// method exists for call sites where teardown is the point.
    pub fn destroy(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Out-of-band health probe against `addr`: fresh connection, PING,
    /// immediate teardown. Does not consume a pool slot.
    pub async fn probe_node(&self, addr: &str) -> bool {
        let Ok(client) = redis::Client::open(self.node_url(addr).as_str()) else {
            return false;
        };

        let connect = tokio::time::timeout(self.config.timeout, client.get_async_connection());
        let Ok(Ok(mut conn)) = connect.await else {
            return false;
        };

        let cmd = redis::cmd("PING");
        let probe = cmd.query_async::<_, String>(&mut conn);
        matches!(
            tokio::time::timeout(self.config.timeout, probe).await,
            Ok(Ok(ref pong)) if pong == "PONG"
        )
    }

    /// Drain every idle connection and free their slots
    pub async fn shutdown(&self) {
        self.shared.lock().await.clear();
        self.per_node.lock().await.clear();
        debug!("Connection pool shut down");
    }

    /// Connection URL for a routed node, carrying the configured password
    /// and database
    #[must_use]
    pub fn node_url(&self, addr: &str) -> String {
        match &self.config.password {
            Some(password) => format!("redis://:{password}@{addr}/{}", self.config.database),
            None => format!("redis://{addr}/{}", self.config.database),
        }
    }

    /// PING with the configured time budget
    async fn ping(&self, conn: &mut PooledConnection) -> bool {
        let cmd = redis::cmd("PING");
        let probe = cmd.query_async::<_, String>(&mut conn.conn);
        matches!(
            tokio::time::timeout(self.config.timeout, probe).await,
            Ok(Ok(ref pong)) if pong == "PONG"
        )
    }

    /// Open a connection after reserving a pool slot
    async fn open_counted(
        &self,
        url: &str,
        node: Option<String>,
    ) -> CacheResult<PooledConnection> {
        if !self.reserve_slot() {
            return Err(CacheError::PoolExhausted {
                capacity: self.config.pool_max,
            });
        }
        let slot = SlotGuard {
            total: Arc::clone(&self.total),
        };

        let client = redis::Client::open(url)
            .map_err(|e| CacheError::connection_failed(url, e.to_string()))?;

        let conn = tokio::time::timeout(self.config.timeout, client.get_async_connection())
            .await
            .map_err(|_| CacheError::Timeout {
                operation: "connect".to_string(),
                elapsed: self.config.timeout,
            })?
            .map_err(|e| CacheError::connection_failed(url, e.to_string()))?;

        Ok(PooledConnection {
            conn,
            node,
            created_at: epoch_secs(),
            _slot: slot,
        })
    }

    /// Atomically claim a slot while the total stays under `pool_max`
    fn reserve_slot(&self) -> bool {
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                (total < self.config.pool_max).then_some(total + 1)
            })
            .is_ok()
    }
}
