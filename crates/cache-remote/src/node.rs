//! Remote node descriptors.

use cache_core::epoch_secs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a node plays inside the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes; every deployment needs at most one per shard
    Master,
    /// Read replica
    Slave,
    /// Sentinel monitor (never serves data)
    Sentinel,
    /// Role not yet classified
    Unknown,
}

impl FromStr for NodeRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" | "primary" => Ok(Self::Master),
            "slave" | "replica" | "secondary" => Ok(Self::Slave),
            "sentinel" => Ok(Self::Sentinel),
            _ => Ok(Self::Unknown),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::Sentinel => "sentinel",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Health status tracked by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Eligible for routing
    Active,
    /// Excluded from routing until a probe succeeds
    Unhealthy,
}

/// A single remote node. Identity is `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Hostname or IP
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Cluster role
    pub role: NodeRole,
    /// Failover priority; lower is preferred
    pub priority: i32,
    /// Weight for weighted-random read selection; always > 0
    pub weight: u32,
    /// Current health
    pub status: NodeStatus,
    /// Epoch seconds of the last health probe
    pub last_check: u64,
}

impl NodeDescriptor {
    /// A fresh active node with default priority and weight
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, role: NodeRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            priority: 0,
            weight: 1,
            status: NodeStatus::Active,
            last_check: epoch_secs(),
        }
    }

    /// Builder-style weight override (clamped to at least 1)
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Builder-style priority override
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The node's identity, `host:port`
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the router may hand this node out
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Parse `host:port[:role[:priority[:weight]]]`
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.trim().split(':');
        let host = parts.next().filter(|h| !h.is_empty())?;
        let port: u16 = parts.next()?.parse().ok()?;

        let role = parts
            .next()
            .and_then(|r| NodeRole::from_str(r).ok())
            .unwrap_or(NodeRole::Unknown);
        let priority: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let weight: u32 = parts.next().and_then(|w| w.parse().ok()).unwrap_or(1);

        Some(
            Self::new(host, port, role)
                .with_priority(priority)
                .with_weight(weight),
        )
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.addr(), self.role)
    }
}
