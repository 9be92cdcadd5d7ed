//! The async Redis-protocol engine wrapping pool and router.

use crate::cluster::ClusterRouter;
use crate::config::ClusterConfig;
use crate::discovery::{RedisTopologyDiscovery, TopologyDiscovery};
use crate::pool::{ConnectionPool, PooledConnection};
use async_trait::async_trait;
use cache_config::RedisConfig;
use cache_core::{CacheEngine, CacheError, CacheKey, CacheResult, PerformanceLevel};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Map a redis-level failure onto the library error model. A Redis type
/// error (for example `INCRBY` on a string) becomes [`CacheError::TypeMismatch`]
/// when the offending key is known.
fn map_redis_error(
    operation: &str,
    key: Option<&str>,
    err: &redis::RedisError,
) -> CacheError {
    if err.kind() == redis::ErrorKind::TypeError {
        if let Some(key) = key {
            return CacheError::TypeMismatch {
                key: key.to_string(),
            };
        }
    }
    CacheError::connection_failed(operation, err.to_string())
}

/// Asynchronous pipelined Redis-protocol cache engine.
///
/// Reads route through the cluster router's read preference, writes always
/// go to the master; both fall back per the failover rules. Every command
/// is bounded by the configured read timeout. Suspension points are
/// exactly connection acquisition, command dispatch, and response wait.
///
/// Cancellation semantics: a command cancelled during dispatch MAY have
/// executed remotely; the connection's pool slot is reclaimed either way.
/// A command cancelled while awaiting its response destroys the connection,
/// since a half-read connection cannot be safely reused.
pub struct RemoteEngine {
    pool: Arc<ConnectionPool>,
    router: Option<Arc<ClusterRouter>>,
    cluster: ClusterConfig,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteEngine {
    /// Compose an engine from connection and cluster configuration.
    /// Invalid cluster topology and inverted pool bounds are fatal here.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] for either condition.
    pub fn new(redis: RedisConfig, cluster: ClusterConfig) -> CacheResult<Self> {
        let router = if cluster.enabled {
            Some(Arc::new(ClusterRouter::new(&cluster)?))
        } else {
            None
        };

        Ok(Self {
            pool: Arc::new(ConnectionPool::new(redis)?),
            router,
            cluster,
            health_task: Mutex::new(None),
        })
    }

    /// Warm the pool, run auto-discovery once (when enabled), and start
    /// the out-of-band health loop.
    pub async fn initialize(&self) {
        self.pool.warm_up().await;

        if self.router.is_some() && self.cluster.auto_discovery {
            let seed = self
                .router
                .as_ref()
                .and_then(|router| router.nodes().first().map(|n| self.pool.node_url(&n.addr())))
                .unwrap_or_else(|| self.pool.config().url());
            let discovery = RedisTopologyDiscovery::new(
                seed,
                self.cluster.cluster_type,
                self.cluster.connect_timeout,
            );
            self.discover_with(&discovery).await;
        }

        self.spawn_health_loop();
    }

    /// Run one discovery pass through `discovery`, replacing the node set
    /// when it reports a non-empty topology.
    pub async fn discover_with(&self, discovery: &dyn TopologyDiscovery) {
        let Some(router) = &self.router else { return };

        match discovery.discover().await {
            Ok(nodes) if !nodes.is_empty() => router.apply_topology(nodes),
            Ok(_) => debug!("Discovery returned no nodes; keeping configured topology"),
            Err(e) => warn!(error = %e, "Topology discovery failed"),
        }
    }

    /// Stop the health loop and drain the pool
    pub async fn shutdown(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
        self.pool.shutdown().await;
        info!("Remote engine shut down");
    }

    /// The underlying router, when cluster mode is on
    #[must_use]
    pub fn router(&self) -> Option<&Arc<ClusterRouter>> {
        self.router.as_ref()
    }

    fn spawn_health_loop(&self) {
        let Some(router) = self.router.clone() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        let interval = self.cluster.health_check_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for node in router.nodes() {
                    let addr = node.addr();
                    if pool.probe_node(&addr).await {
                        router.mark_active(&addr);
                    } else {
                        router.mark_unhealthy(&addr);
                    }
                }
            }
        });
        *self.health_task.lock() = Some(task);
    }

    fn command_timeout(&self) -> Duration {
        if self.cluster.enabled {
            self.cluster.read_timeout
        } else {
            self.pool.config().timeout
        }
    }

    /// Acquire a read connection: routed by read preference with failover,
    /// falling through to the generic acquire path when no healthy node of
    /// the preferred class remains.
    async fn read_conn(&self) -> CacheResult<PooledConnection> {
        if let Some(router) = &self.router {
            while let Some(node) = router.read_node() {
                let addr = node.addr();
                match self.pool.acquire_for_node(&addr).await {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        warn!(node = %addr, error = %e, "Read node unreachable, failing over");
                        router.mark_unhealthy(&addr);
                    }
                }
            }
        }
        self.pool.acquire().await
    }

    /// Acquire a write connection: always the master, with failover across
    /// (re)classified masters.
    async fn write_conn(&self) -> CacheResult<PooledConnection> {
        if let Some(router) = &self.router {
            while let Some(node) = router.write_node() {
                let addr = node.addr();
                match self.pool.acquire_for_node(&addr).await {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        warn!(node = %addr, error = %e, "Master unreachable, failing over");
                        router.mark_unhealthy(&addr);
                    }
                }
            }
            return Err(CacheError::NoHealthyNode {
                role: "master".to_string(),
            });
        }
        self.pool.acquire().await
    }

    /// Execute one prepared command on an appropriately routed connection,
    /// bounded by the read timeout. Healthy connections return to the
    /// pool; timed-out or I/O-broken connections are destroyed.
    async fn execute<T: redis::FromRedisValue>(
        &self,
        operation: &'static str,
        key_ctx: Option<&str>,
        write: bool,
        cmd: redis::Cmd,
    ) -> CacheResult<T> {
        let mut conn = if write {
            self.write_conn().await?
        } else {
            self.read_conn().await?
        };

        let budget = self.command_timeout();
        match tokio::time::timeout(budget, cmd.query_async::<_, T>(&mut conn.conn)).await {
            Ok(Ok(value)) => {
                self.pool.release(conn).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                let mapped = map_redis_error(operation, key_ctx, &e);
                if e.is_io_error() {
                    self.pool.destroy(conn);
                } else {
                    self.pool.release(conn).await;
                }
                Err(mapped)
            }
            Err(_) => {
                // The response never arrived; the connection cannot be
                // reused safely.
                self.pool.destroy(conn);
                Err(CacheError::Timeout {
                    operation: operation.to_string(),
                    elapsed: budget,
                })
            }
        }
    }

    /// Pipeline variant of [`Self::execute`]
    async fn execute_pipe<T: redis::FromRedisValue>(
        &self,
        operation: &'static str,
        write: bool,
        pipe: redis::Pipeline,
    ) -> CacheResult<T> {
        let mut conn = if write {
            self.write_conn().await?
        } else {
            self.read_conn().await?
        };

        let budget = self.command_timeout();
        match tokio::time::timeout(budget, pipe.query_async::<_, T>(&mut conn.conn)).await {
            Ok(Ok(value)) => {
                self.pool.release(conn).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                let mapped = map_redis_error(operation, None, &e);
                if e.is_io_error() {
                    self.pool.destroy(conn);
                } else {
                    self.pool.release(conn).await;
                }
                Err(mapped)
            }
            Err(_) => {
                self.pool.destroy(conn);
                Err(CacheError::Timeout {
                    operation: operation.to_string(),
                    elapsed: budget,
                })
            }
        }
    }

    /// Retry transient faults up to the configured attempt budget
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, run: F) -> CacheResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let attempts = self.cluster.retry_attempts;
        let mut last: Option<CacheError> = None;

        for attempt in 0..=attempts {
            match run().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %e,
                        "Transient fault, retrying"
                    );
                    tokio::time::sleep(self.cluster.retry_delay).await;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| CacheError::engine_unavailable("redis")))
    }

    async fn get_once(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key.as_str());
        self.execute("GET", Some(key.as_str()), false, cmd).await
    }

    async fn set_once(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let mut cmd;
        if ttl_seconds > 0 {
            cmd = redis::cmd("SETEX");
            cmd.arg(key.as_str()).arg(ttl_seconds).arg(value);
        } else {
            cmd = redis::cmd("SET");
            cmd.arg(key.as_str()).arg(value);
        }
        self.execute::<()>("SET", Some(key.as_str()), true, cmd).await
    }

    async fn mget_once(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.as_str());
        }
        self.execute("MGET", None, false, cmd).await
    }
}

#[async_trait]
impl CacheEngine for RemoteEngine {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn performance_level(&self) -> PerformanceLevel {
        PerformanceLevel::new(3)
    }

    async fn is_available(&self) -> bool {
        self.ping().await.is_ok()
    }

    async fn ping(&self) -> CacheResult<()> {
        let pong: String = self
            .execute("PING", None, false, redis::cmd("PING"))
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::connection_failed(
                "PING",
                format!("unexpected response '{pong}'"),
            ))
        }
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        self.with_retry("GET", || self.get_once(key)).await
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        self.with_retry("SET", || self.set_once(key, value, ttl_seconds))
            .await
    }

    async fn add(&self, key: &CacheKey, value: &[u8], ttl_seconds: u64) -> CacheResult<bool> {
        // SET NX is the protocol's atomic set-if-absent.
        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_str()).arg(value).arg("NX");
        if ttl_seconds > 0 {
            cmd.arg("EX").arg(ttl_seconds);
        }
        let reply: Option<String> = self.execute("ADD", Some(key.as_str()), true, cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let removed: i64 = self
            .with_retry("DEL", || {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(key.as_str());
                self.execute("DEL", Some(key.as_str()), true, cmd)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key.as_str());
        let found: i64 = self.execute("EXISTS", Some(key.as_str()), false, cmd).await?;
        Ok(found > 0)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.execute::<()>("FLUSHDB", None, true, redis::cmd("FLUSHDB"))
            .await
    }

    async fn increment(&self, key: &CacheKey, delta: i64) -> CacheResult<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key.as_str()).arg(delta);
        self.execute("INCRBY", Some(key.as_str()), true, cmd).await
    }

    async fn get_multiple(&self, keys: &[CacheKey]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        match self.mget_once(keys).await {
            Ok(values) => Ok(values),
            Err(e) => {
                // Degrade to per-key gets; absent and failing keys are None.
                warn!(error = %e, "MGET failed, falling back to per-key gets");
                let mut values = Vec::with_capacity(keys.len());
                for key in keys {
                    values.push(self.get_once(key).await.unwrap_or(None));
                }
                Ok(values)
            }
        }
    }

    async fn set_multiple(
        &self,
        entries: &[(CacheKey, Vec<u8>)],
        ttl_seconds: u64,
    ) -> CacheResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        if ttl_seconds > 0 {
            // Expiring batches pipeline one SETEX per key.
            let mut pipe = redis::pipe();
            for (key, value) in entries {
                pipe.cmd("SETEX")
                    .arg(key.as_str())
                    .arg(ttl_seconds)
                    .arg(value.as_slice());
            }

            match self.execute_pipe::<Vec<String>>("SETEX-batch", true, pipe).await {
                Ok(replies) => {
                    return Ok(replies.iter().filter(|reply| *reply == "OK").count());
                }
                Err(e) => {
                    warn!(error = %e, "Pipelined SETEX failed, falling back to per-key sets");
                }
            }
        } else {
            let mut cmd = redis::cmd("MSET");
            for (key, value) in entries {
                cmd.arg(key.as_str()).arg(value.as_slice());
            }
            match self.execute::<()>("MSET", None, true, cmd).await {
                Ok(()) => return Ok(entries.len()),
                Err(e) => {
                    warn!(error = %e, "MSET failed, falling back to per-key sets");
                }
            }
        }

        // Per-key fallback; the stored count reports only successes.
        let mut stored = 0;
        for (key, value) in entries {
            if self.set_once(key, value, ttl_seconds).await.is_ok() {
                stored += 1;
            }
        }
        Ok(stored)
    }

    async fn delete_multiple(&self, keys: &[CacheKey]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_str());
        }
        let removed: i64 = self.execute("DEL", None, true, cmd).await?;
        Ok(removed as usize)
    }

    async fn touch(&self, key: &CacheKey, ttl_seconds: u64) -> CacheResult<bool> {
        let mut cmd;
        if ttl_seconds > 0 {
            cmd = redis::cmd("EXPIRE");
            cmd.arg(key.as_str()).arg(ttl_seconds);
        } else {
            cmd = redis::cmd("PERSIST");
            cmd.arg(key.as_str());
        }
        let applied: i64 = self.execute("TOUCH", Some(key.as_str()), true, cmd).await?;
        Ok(applied > 0)
    }

    async fn count(&self) -> CacheResult<usize> {
        let size: i64 = self
            .execute("DBSIZE", None, false, redis::cmd("DBSIZE"))
            .await?;
        Ok(size as usize)
    }

    async fn cleanup(&self) -> CacheResult<usize> {
        // The server expires entries itself; there is nothing to sweep.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterType, ReadPreference};
    use crate::node::{NodeDescriptor, NodeRole};

    fn cluster_config() -> ClusterConfig {
        ClusterConfig {
            enabled: true,
            cluster_type: ClusterType::Replica,
            read_preference: ReadPreference::Secondary,
            nodes: vec![
                NodeDescriptor::new("m", 7000, NodeRole::Master),
                NodeDescriptor::new("s", 7001, NodeRole::Slave),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn construction_validates_cluster_topology() {
        let bad = ClusterConfig {
            enabled: true,
            cluster_type: ClusterType::Replica,
            nodes: vec![NodeDescriptor::new("s", 7001, NodeRole::Slave)],
            ..Default::default()
        };
        assert!(RemoteEngine::new(RedisConfig::default(), bad).is_err());
        assert!(RemoteEngine::new(RedisConfig::default(), cluster_config()).is_ok());
    }

    #[test]
    fn construction_validates_pool_bounds() {
        let redis = RedisConfig {
            pool_min: 9,
            pool_max: 3,
            ..Default::default()
        };
        assert!(RemoteEngine::new(redis, ClusterConfig::default()).is_err());
    }

    #[test]
    fn type_errors_map_to_type_mismatch() {
        let redis_err = redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        ));
        let mapped = map_redis_error("INCRBY", Some("counter"), &redis_err);
        assert!(matches!(mapped, CacheError::TypeMismatch { .. }));

        let mapped = map_redis_error("GET", None, &redis_err);
        assert!(matches!(mapped, CacheError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn discovery_hook_replaces_topology() {
        use crate::discovery::StaticTopology;

        let engine = RemoteEngine::new(RedisConfig::default(), cluster_config()).unwrap();
        let discovered = vec![
            NodeDescriptor::new("m2", 7100, NodeRole::Master),
            NodeDescriptor::new("s2", 7101, NodeRole::Slave),
            NodeDescriptor::new("s3", 7102, NodeRole::Slave),
        ];
        engine
            .discover_with(&StaticTopology::new(discovered))
            .await;

        let router = engine.router().unwrap();
        assert_eq!(router.nodes().len(), 3);
        assert_eq!(router.write_node().unwrap().addr(), "m2:7100");
    }

    #[tokio::test]
    async fn empty_discovery_keeps_configured_topology() {
        use crate::discovery::StaticTopology;

        let engine = RemoteEngine::new(RedisConfig::default(), cluster_config()).unwrap();
        engine.discover_with(&StaticTopology::new(Vec::new())).await;
        assert_eq!(engine.router().unwrap().nodes().len(), 2);
    }
}
