//! Cluster routing, validation, and failover scenarios.

use cache_config::RedisConfig;
use cache_core::CacheError;
use cache_remote::{
    ClusterConfig, ClusterRouter, ClusterType, NodeDescriptor, NodeRole, ReadPreference,
    RemoteEngine, StaticTopology,
};

fn replica_topology() -> ClusterConfig {
    ClusterConfig {
        enabled: true,
        cluster_type: ClusterType::Replica,
        read_preference: ReadPreference::Secondary,
        nodes: vec![
            NodeDescriptor::new("m", 7000, NodeRole::Master),
            NodeDescriptor::new("s", 7001, NodeRole::Slave),
            NodeDescriptor::new("s", 7002, NodeRole::Slave),
        ],
        ..Default::default()
    }
}

/// With one slave down every read lands on the survivor; with both down
/// the router reports no candidate.
#[tokio::test]
async fn failover_excludes_unhealthy_slaves() {
    let router = ClusterRouter::new(&replica_topology()).unwrap();

    router.mark_unhealthy("s:7001");
    for _ in 0..100 {
        assert_eq!(router.read_node().unwrap().addr(), "s:7002");
    }

    router.mark_unhealthy("s:7002");
    assert!(router.read_node().is_none());

    // The write path is untouched by slave health.
    assert_eq!(router.write_node().unwrap().addr(), "m:7000");
}

/// Secondary preference returns the healthy slave and never an
/// unhealthy one
#[tokio::test]
async fn read_routing_honors_secondary_preference() {
    let mut config = replica_topology();
    config.nodes = vec![
        NodeDescriptor::new("m", 7000, NodeRole::Master),
        NodeDescriptor::new("s", 7001, NodeRole::Slave),
    ];
    let router = ClusterRouter::new(&config).unwrap();

    for _ in 0..50 {
        assert_eq!(router.read_node().unwrap().addr(), "s:7001");
    }

    router.mark_unhealthy("s:7001");
    assert!(router.read_node().is_none());
}

/// Topology validation is fatal at construction, never later
#[tokio::test]
async fn misconfigured_topologies_fail_construction() {
    let sentinel_without_master = ClusterConfig {
        enabled: true,
        cluster_type: ClusterType::Sentinel,
        nodes: vec![
            NodeDescriptor::new("w", 26379, NodeRole::Sentinel),
            NodeDescriptor::new("w", 26380, NodeRole::Sentinel),
        ],
        ..Default::default()
    };
    assert!(matches!(
        RemoteEngine::new(RedisConfig::default(), sentinel_without_master),
        Err(CacheError::ClusterMisconfigured { .. })
    ));

    let replica_without_master = ClusterConfig {
        enabled: true,
        cluster_type: ClusterType::Replica,
        nodes: vec![NodeDescriptor::new("s", 7001, NodeRole::Slave)],
        ..Default::default()
    };
    assert!(RemoteEngine::new(RedisConfig::default(), replica_without_master).is_err());
}

/// Inverted pool bounds are the other fatal-at-construction condition
#[tokio::test]
async fn inverted_pool_bounds_fail_construction() {
    let redis = RedisConfig {
        pool_min: 50,
        pool_max: 10,
        ..Default::default()
    };
    assert!(matches!(
        RemoteEngine::new(redis, ClusterConfig::default()),
        Err(CacheError::ClusterMisconfigured { .. })
    ));
}

/// Discovery replaces the node set; recovered health state is fresh
#[tokio::test]
async fn discovery_updates_routing() {
    let engine = RemoteEngine::new(RedisConfig::default(), replica_topology()).unwrap();

    let rebuilt = vec![
        NodeDescriptor::new("m", 8000, NodeRole::Master),
        NodeDescriptor::new("s", 8001, NodeRole::Slave).with_weight(4),
    ];
    engine.discover_with(&StaticTopology::new(rebuilt)).await;

    let router = engine.router().unwrap();
    assert_eq!(router.write_node().unwrap().addr(), "m:8000");
    assert_eq!(router.read_node().unwrap().addr(), "s:8001");
}

/// Weighted selection distributes across healthy slaves
#[tokio::test]
async fn weighted_reads_reach_every_healthy_slave() {
    let router = ClusterRouter::new(&replica_topology()).unwrap();

    let mut seen_7001 = false;
    let mut seen_7002 = false;
    for _ in 0..200 {
        match router.read_node().unwrap().addr().as_str() {
            "s:7001" => seen_7001 = true,
            "s:7002" => seen_7002 = true,
            other => panic!("unexpected read node {other}"),
        }
    }
    assert!(seen_7001 && seen_7002, "both slaves should serve reads");
}
