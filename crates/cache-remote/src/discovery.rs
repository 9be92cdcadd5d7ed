//! Pluggable topology auto-discovery.
//!
//! The router's contract is only that, when enabled, discovery runs once at
//! initialization and updates the node set. The protocol itself is
//! backend-specific: `CLUSTER NODES` for sharded clusters, `SENTINEL
//! masters`/`SENTINEL slaves` for sentinel deployments.

use crate::config::ClusterType;
use crate::node::{NodeDescriptor, NodeRole};
use async_trait::async_trait;
use cache_core::{CacheError, CacheResult};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A source of cluster topology.
#[async_trait]
pub trait TopologyDiscovery: Send + Sync {
    /// Discover the current node set. An empty result leaves the
    /// configured topology untouched.
    async fn discover(&self) -> CacheResult<Vec<NodeDescriptor>>;
}

/// Fixed topology; used in tests and for deployments without a discovery
/// protocol.
pub struct StaticTopology {
    nodes: Vec<NodeDescriptor>,
}

impl StaticTopology {
    /// Wrap a fixed node set
    #[must_use]
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl TopologyDiscovery for StaticTopology {
    async fn discover(&self) -> CacheResult<Vec<NodeDescriptor>> {
        Ok(self.nodes.clone())
    }
}

/// Discovery against a live Redis deployment, seeded with one reachable
/// node.
pub struct RedisTopologyDiscovery {
    seed_url: String,
    cluster_type: ClusterType,
    connect_timeout: Duration,
}

impl RedisTopologyDiscovery {
    /// Create a discoverer that queries `seed_url`
    #[must_use]
    pub fn new(
        seed_url: impl Into<String>,
        cluster_type: ClusterType,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            seed_url: seed_url.into(),
            cluster_type,
            connect_timeout,
        }
    }

    async fn connect(&self) -> CacheResult<redis::aio::Connection> {
        let client = redis::Client::open(self.seed_url.as_str())
            .map_err(|e| CacheError::connection_failed(&self.seed_url, e.to_string()))?;

        tokio::time::timeout(self.connect_timeout, client.get_async_connection())
            .await
            .map_err(|_| CacheError::Timeout {
                operation: "discovery connect".to_string(),
                elapsed: self.connect_timeout,
            })?
            .map_err(|e| CacheError::connection_failed(&self.seed_url, e.to_string()))
    }

    async fn discover_cluster(&self) -> CacheResult<Vec<NodeDescriptor>> {
        let mut conn = self.connect().await?;
        let raw: String = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::connection_failed(&self.seed_url, e.to_string()))?;

        Ok(parse_cluster_nodes(&raw))
    }

    async fn discover_sentinel(&self) -> CacheResult<Vec<NodeDescriptor>> {
        let mut conn = self.connect().await?;
        let masters: Vec<HashMap<String, String>> = redis::cmd("SENTINEL")
            .arg("masters")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::connection_failed(&self.seed_url, e.to_string()))?;

        let mut nodes = Vec::new();
        for master in &masters {
            let Some(node) = node_from_sentinel_record(master, NodeRole::Master) else {
                continue;
            };
            let name = master.get("name").cloned().unwrap_or_default();
            nodes.push(node);

            let slaves: Vec<HashMap<String, String>> = redis::cmd("SENTINEL")
                .arg("slaves")
                .arg(&name)
                .query_async(&mut conn)
                .await
                .unwrap_or_default();
            nodes.extend(
                slaves
                    .iter()
                    .filter_map(|record| node_from_sentinel_record(record, NodeRole::Slave)),
            );
        }
        Ok(nodes)
    }
}

#[async_trait]
impl TopologyDiscovery for RedisTopologyDiscovery {
    async fn discover(&self) -> CacheResult<Vec<NodeDescriptor>> {
        let nodes = match self.cluster_type {
            ClusterType::Cluster => self.discover_cluster().await?,
            ClusterType::Sentinel => self.discover_sentinel().await?,
            // Plain replication has no discovery protocol.
            ClusterType::Replica => Vec::new(),
        };
        debug!(nodes = nodes.len(), "Topology discovery finished");
        Ok(nodes)
    }
}

/// Parse `CLUSTER NODES` output: one line per node,
/// `<id> <host:port@cport> <flags> …` where flags name the role.
fn parse_cluster_nodes(raw: &str) -> Vec<NodeDescriptor> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let addr = fields.next()?.split('@').next()?;
            let flags = fields.next()?;

            let (host, port) = addr.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;

            let role = if flags.split(',').any(|flag| flag == "master") {
                NodeRole::Master
            } else if flags.split(',').any(|flag| flag == "slave") {
                NodeRole::Slave
            } else {
                NodeRole::Unknown
            };

            if flags.split(',').any(|flag| flag == "fail" || flag == "noaddr") {
                warn!(addr = %addr, flags = %flags, "Skipping failed node from discovery");
                return None;
            }

            Some(NodeDescriptor::new(host, port, role))
        })
        .collect()
}

fn node_from_sentinel_record(
    record: &HashMap<String, String>,
    role: NodeRole,
) -> Option<NodeDescriptor> {
    let host = record.get("ip")?.clone();
    let port: u16 = record.get("port")?.parse().ok()?;
    Some(NodeDescriptor::new(host, port, role))
}
