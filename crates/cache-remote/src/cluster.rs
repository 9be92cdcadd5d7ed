//! Cluster router: node classification, read/write routing, health state.

use crate::config::{ClusterConfig, ReadPreference};
use crate::node::{NodeDescriptor, NodeRole, NodeStatus};
use cache_core::{epoch_secs, CacheResult};
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, warn};

/// Routes operations to cluster nodes and tracks their health.
///
/// Node state is append-only except for the health flips
/// ([`ClusterRouter::mark_unhealthy`] / [`ClusterRouter::mark_active`]),
/// which may run concurrently with routing.
pub struct ClusterRouter {
    nodes: RwLock<Vec<NodeDescriptor>>,
    read_preference: ReadPreference,
}

impl ClusterRouter {
    /// Build a router from a validated configuration.
    ///
    /// # Errors
    /// Propagates [`ClusterConfig::validate`] failures; an invalid topology
    /// is fatal at construction.
    pub fn new(config: &ClusterConfig) -> CacheResult<Self> {
        config.validate()?;
        info!(
            nodes = config.nodes.len(),
            cluster_type = ?config.cluster_type,
            read_preference = ?config.read_preference,
            "Cluster router initialized"
        );
        Ok(Self {
            nodes: RwLock::new(config.nodes.clone()),
            read_preference: config.read_preference,
        })
    }

    /// Snapshot of the current node set
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeDescriptor> {
        self.nodes.read().clone()
    }

    /// Append a node; replaces any existing descriptor with the same
    /// `host:port` identity
    pub fn add_node(&self, node: NodeDescriptor) {
        let mut nodes = self.nodes.write();
        nodes.retain(|existing| existing.addr() != node.addr());
        nodes.push(node);
    }

    /// Remove a node by `host:port`; returns whether it existed
    pub fn remove_node(&self, addr: &str) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|node| node.addr() != addr);
        nodes.len() != before
    }

    /// Replace the node set with a freshly discovered topology
    pub fn apply_topology(&self, discovered: Vec<NodeDescriptor>) {
        info!(nodes = discovered.len(), "Applying discovered topology");
        *self.nodes.write() = discovered;
    }

    /// The node that serves writes: always the master
    #[must_use]
    pub fn write_node(&self) -> Option<NodeDescriptor> {
        self.nodes
            .read()
            .iter()
            .find(|node| node.role == NodeRole::Master && node.is_healthy())
            .cloned()
    }

    /// The node that serves the next read, per the configured preference.
    ///
    /// Returns `None` when no healthy node of the requested class exists;
    /// the caller is expected to fall through to its generic acquire path.
    #[must_use]
    pub fn read_node(&self) -> Option<NodeDescriptor> {
        let nodes = self.nodes.read();
        match self.read_preference {
            ReadPreference::Primary => nodes
                .iter()
                .find(|node| node.role == NodeRole::Master && node.is_healthy())
                .cloned(),
            ReadPreference::Secondary => {
                let slaves: Vec<&NodeDescriptor> = nodes
                    .iter()
                    .filter(|node| node.role == NodeRole::Slave && node.is_healthy())
                    .collect();
                weighted_pick(&slaves).cloned()
            }
            ReadPreference::Any => {
                let healthy: Vec<&NodeDescriptor> = nodes
                    .iter()
                    .filter(|node| {
                        node.is_healthy() && node.role != NodeRole::Sentinel
                    })
                    .collect();
                weighted_pick(&healthy).cloned()
            }
        }
    }

    /// Flag a node unhealthy so routing skips it until a probe recovers it
    pub fn mark_unhealthy(&self, addr: &str) {
        self.set_status(addr, NodeStatus::Unhealthy);
        warn!(node = %addr, "Node marked unhealthy");
    }

    /// Flag a node healthy again after a successful probe
    pub fn mark_active(&self, addr: &str) {
        self.set_status(addr, NodeStatus::Active);
        debug!(node = %addr, "Node marked active");
    }

    fn set_status(&self, addr: &str, status: NodeStatus) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.iter_mut().find(|node| node.addr() == addr) {
            node.status = status;
            node.last_check = epoch_secs();
        }
    }

    /// Healthy nodes of the class implied by the read preference, ordered
    /// for failover (priority ascending, then address). Used by the engine
    /// to walk candidates after a connection failure.
    #[must_use]
    pub fn read_candidates(&self) -> Vec<NodeDescriptor> {
        let nodes = self.nodes.read();
        let mut candidates: Vec<NodeDescriptor> = nodes
            .iter()
            .filter(|node| {
                node.is_healthy()
                    && match self.read_preference {
                        ReadPreference::Primary => node.role == NodeRole::Master,
                        ReadPreference::Secondary => node.role == NodeRole::Slave,
                        ReadPreference::Any => node.role != NodeRole::Sentinel,
                    }
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.addr().cmp(&b.addr())));
        candidates
    }
}

/// Weighted-random selection: draw `r` in `[1, Σweights]` and take the
/// first node whose cumulative weight reaches it.
fn weighted_pick<'a>(candidates: &[&'a NodeDescriptor]) -> Option<&'a NodeDescriptor> {
    if candidates.is_empty() {
        return None;
    }

    let total: u64 = candidates.iter().map(|node| u64::from(node.weight)).sum();
    let draw = rand::thread_rng().gen_range(1..=total);

    let mut cumulative = 0u64;
    for node in candidates {
        cumulative += u64::from(node.weight);
        if cumulative >= draw {
            return Some(node);
        }
    }
    candidates.last().copied()
}
