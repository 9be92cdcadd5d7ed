//! Cluster configuration loading and validation.

use crate::node::{NodeDescriptor, NodeRole};
use cache_config::{env_parse, env_string};
use cache_core::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Deployment topology of the remote backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Redis-cluster style sharded deployment
    Cluster,
    /// Sentinel-monitored failover deployment
    Sentinel,
    /// Plain master/replica pair(s)
    Replica,
}

impl FromStr for ClusterType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cluster" => Ok(Self::Cluster),
            "sentinel" => Ok(Self::Sentinel),
            "replica" | "replication" => Ok(Self::Replica),
            other => Err(CacheError::ClusterMisconfigured {
                reason: format!("unknown cluster type '{other}'"),
            }),
        }
    }
}

/// Which class of node serves reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    /// Always the master
    Primary,
    /// Weighted-random among healthy slaves
    Secondary,
    /// Weighted-random among all healthy nodes
    Any,
}

impl FromStr for ReadPreference {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "master" => Ok(Self::Primary),
            "secondary" | "slave" | "replica" => Ok(Self::Secondary),
            _ => Ok(Self::Any),
        }
    }
}

/// Full cluster configuration (`REDIS_CLUSTER_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether cluster routing is enabled at all
    pub enabled: bool,
    /// Deployment topology
    pub cluster_type: ClusterType,
    /// Known nodes; may be replaced by auto-discovery
    pub nodes: Vec<NodeDescriptor>,
    /// Read routing policy
    pub read_preference: ReadPreference,
    /// Acknowledgements required for a write to count as accepted
    pub write_concern: u32,
    /// TCP establishment budget
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Single-command response budget
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Retry budget per operation
    pub retry_attempts: u32,
    /// Delay between retry attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Out-of-band health probe cadence
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Whether to run topology discovery at initialization
    pub auto_discovery: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cluster_type: ClusterType::Replica,
            nodes: Vec::new(),
            read_preference: ReadPreference::Any,
            write_concern: 1,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            health_check_interval: Duration::from_secs(30),
            auto_discovery: false,
        }
    }
}

impl ClusterConfig {
    /// Load cluster settings from the environment. Node lists are accepted
    /// in both recognized shapes:
    /// `REDIS_CLUSTER_NODES=host:port[:role[:priority[:weight]]],…` and the
    /// indexed `REDIS_CLUSTER_NODE_<i>_{HOST,PORT,ROLE,PRIORITY,WEIGHT}`.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] when enabled with an invalid
    /// type or a node set that fails validation.
    pub fn from_env() -> CacheResult<Self> {
        let defaults = Self::default();
        let enabled = env_string("REDIS_CLUSTER_ENABLED", "false")
            .eq_ignore_ascii_case("true");

        let cluster_type = if enabled {
            env_string("REDIS_CLUSTER_TYPE", "replica").parse()?
        } else {
            defaults.cluster_type
        };

        let mut nodes = parse_node_list(&env_string("REDIS_CLUSTER_NODES", ""));
        if nodes.is_empty() {
            nodes = parse_indexed_nodes();
        }

        let config = Self {
            enabled,
            cluster_type,
            nodes,
            read_preference: env_string("REDIS_CLUSTER_READ_PREFERENCE", "any")
                .parse()
                .unwrap_or(ReadPreference::Any),
            write_concern: env_parse("REDIS_CLUSTER_WRITE_CONCERN", defaults.write_concern),
            connect_timeout: Duration::from_secs(env_parse(
                "REDIS_CLUSTER_CONNECT_TIMEOUT",
                5u64,
            )),
            read_timeout: Duration::from_secs(env_parse("REDIS_CLUSTER_READ_TIMEOUT", 3u64)),
            retry_attempts: env_parse("REDIS_CLUSTER_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_delay: Duration::from_millis(env_parse("REDIS_CLUSTER_RETRY_DELAY", 100u64)),
            health_check_interval: Duration::from_secs(env_parse(
                "REDIS_CLUSTER_HEALTH_CHECK_INTERVAL",
                30u64,
            )),
            auto_discovery: env_string("REDIS_CLUSTER_AUTO_DISCOVERY", "false")
                .eq_ignore_ascii_case("true"),
        };

        if config.enabled {
            config.validate()?;
        }
        Ok(config)
    }

    /// Enforce cluster-type minimums. Shortfalls that merely degrade
    /// redundancy are logged as warnings; a missing master where one is
    /// required is fatal.
    ///
    /// # Errors
    /// [`CacheError::ClusterMisconfigured`] for an empty node set, or for
    /// sentinel/replica topologies without a master.
    pub fn validate(&self) -> CacheResult<()> {
        if self.nodes.is_empty() {
            return Err(CacheError::ClusterMisconfigured {
                reason: "cluster mode enabled but no nodes configured".to_string(),
            });
        }

        let masters = self.count_role(NodeRole::Master);
        let slaves = self.count_role(NodeRole::Slave);
        let sentinels = self.count_role(NodeRole::Sentinel);

        match self.cluster_type {
            ClusterType::Cluster => {
                if self.nodes.len() < 3 {
                    warn!(
                        nodes = self.nodes.len(),
                        "Cluster topology has fewer than 3 nodes"
                    );
                }
            }
            ClusterType::Sentinel => {
                if masters == 0 {
                    return Err(CacheError::ClusterMisconfigured {
                        reason: "sentinel topology requires a master node".to_string(),
                    });
                }
                if sentinels < 3 {
                    warn!(sentinels, "Sentinel topology has fewer than 3 sentinels");
                }
            }
            ClusterType::Replica => {
                if masters == 0 {
                    return Err(CacheError::ClusterMisconfigured {
                        reason: "replica topology requires a master node".to_string(),
                    });
                }
                if slaves == 0 {
                    warn!("Replica topology has no slaves; reads fall back to the master");
                }
            }
        }
        Ok(())
    }

    fn count_role(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role == role).count()
    }
}

/// Parse the comma-separated `REDIS_CLUSTER_NODES` shape
fn parse_node_list(raw: &str) -> Vec<NodeDescriptor> {
    raw.split(',')
        .filter(|spec| !spec.trim().is_empty())
        .filter_map(|spec| {
            let node = NodeDescriptor::parse(spec);
            if node.is_none() {
                warn!(spec = %spec, "Skipping unparseable cluster node spec");
            }
            node
        })
        .collect()
}

/// Parse the indexed `REDIS_CLUSTER_NODE_<i>_*` shape, scanning from 0
/// until the first missing host
fn parse_indexed_nodes() -> Vec<NodeDescriptor> {
    let mut nodes = Vec::new();
    for i in 0.. {
        let Ok(host) = std::env::var(format!("REDIS_CLUSTER_NODE_{i}_HOST")) else {
            break;
        };
        let port = env_parse(&format!("REDIS_CLUSTER_NODE_{i}_PORT"), 6379u16);
        let role = env_string(&format!("REDIS_CLUSTER_NODE_{i}_ROLE"), "unknown")
            .parse()
            .unwrap_or(NodeRole::Unknown);
        let priority = env_parse(&format!("REDIS_CLUSTER_NODE_{i}_PRIORITY"), 0i32);
        let weight = env_parse(&format!("REDIS_CLUSTER_NODE_{i}_WEIGHT"), 1u32);

        nodes.push(
            NodeDescriptor::new(host, port, role)
                .with_priority(priority)
                .with_weight(weight),
        );
    }
    nodes
}
