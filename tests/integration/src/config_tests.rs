//! Environment-driven configuration loading.

use crate::helpers::ENV_LOCK;
use cache_config::{parse_size, CacheSettings, EnginePreference, RedisConfig};
use cache_remote::{ClusterConfig, ClusterType, NodeRole, ReadPreference};
use std::time::Duration;

fn clear_env(keys: &[&str]) {
    for key in keys {
        std::env::remove_var(key);
    }
}

#[tokio::test]
async fn cache_settings_read_the_documented_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("CACHE_ENGINE", "memory");
    std::env::set_var("CACHE_DEFAULT_STORE", "file");
    std::env::set_var("CACHE_BATCH_SIZE", "250");
    std::env::set_var("CACHE_MEMORY_LIMIT", "64M");
    std::env::set_var("CACHE_TTL_DEFAULT", "120");

    let settings = CacheSettings::from_env();
    assert_eq!(
        settings.engine,
        EnginePreference::Named("memory".to_string())
    );
    assert_eq!(settings.default_store, "file");
    assert_eq!(settings.batch_size, 250);
    assert_eq!(settings.memory_limit, 64 * 1024 * 1024);
    assert_eq!(settings.default_ttl, Duration::from_secs(120));

    clear_env(&[
        "CACHE_ENGINE",
        "CACHE_DEFAULT_STORE",
        "CACHE_BATCH_SIZE",
        "CACHE_MEMORY_LIMIT",
        "CACHE_TTL_DEFAULT",
    ]);
}

#[tokio::test]
async fn unset_environment_yields_documented_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env(&["CACHE_ENGINE", "CACHE_DEFAULT_STORE", "CACHE_TTL_DEFAULT"]);

    let settings = CacheSettings::from_env();
    assert_eq!(settings.engine, EnginePreference::Auto);
    assert_eq!(settings.default_store, "redis");
    assert_eq!(settings.default_ttl, Duration::from_secs(3600));
}

#[tokio::test]
async fn redis_config_rejects_inverted_pool_bounds_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("CACHE_REDIS_POOL_MIN", "40");
    std::env::set_var("CACHE_REDIS_POOL_MAX", "10");

    assert!(RedisConfig::from_env().is_err());

    clear_env(&["CACHE_REDIS_POOL_MIN", "CACHE_REDIS_POOL_MAX"]);
}

#[tokio::test]
async fn cluster_nodes_parse_from_the_compact_form() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("REDIS_CLUSTER_ENABLED", "true");
    std::env::set_var("REDIS_CLUSTER_TYPE", "replica");
    std::env::set_var("REDIS_CLUSTER_READ_PREFERENCE", "secondary");
    std::env::set_var(
        "REDIS_CLUSTER_NODES",
        "10.0.0.1:7000:master:0:2,10.0.0.2:7001:slave:1:3",
    );

    let config = ClusterConfig::from_env().unwrap();
    assert!(config.enabled);
    assert_eq!(config.cluster_type, ClusterType::Replica);
    assert_eq!(config.read_preference, ReadPreference::Secondary);
    assert_eq!(config.nodes.len(), 2);
    assert_eq!(config.nodes[0].role, NodeRole::Master);
    assert_eq!(config.nodes[0].weight, 2);
    assert_eq!(config.nodes[1].addr(), "10.0.0.2:7001");
    assert_eq!(config.nodes[1].priority, 1);

    clear_env(&[
        "REDIS_CLUSTER_ENABLED",
        "REDIS_CLUSTER_TYPE",
        "REDIS_CLUSTER_READ_PREFERENCE",
        "REDIS_CLUSTER_NODES",
    ]);
}

#[tokio::test]
async fn cluster_nodes_parse_from_the_indexed_form() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env(&["REDIS_CLUSTER_NODES"]);
    std::env::set_var("REDIS_CLUSTER_ENABLED", "true");
    std::env::set_var("REDIS_CLUSTER_TYPE", "replica");
    std::env::set_var("REDIS_CLUSTER_NODE_0_HOST", "10.1.0.1");
    std::env::set_var("REDIS_CLUSTER_NODE_0_PORT", "7000");
    std::env::set_var("REDIS_CLUSTER_NODE_0_ROLE", "master");
    std::env::set_var("REDIS_CLUSTER_NODE_1_HOST", "10.1.0.2");
    std::env::set_var("REDIS_CLUSTER_NODE_1_ROLE", "slave");
    std::env::set_var("REDIS_CLUSTER_NODE_1_WEIGHT", "5");

    let config = ClusterConfig::from_env().unwrap();
    assert_eq!(config.nodes.len(), 2);
    assert_eq!(config.nodes[0].addr(), "10.1.0.1:7000");
    assert_eq!(config.nodes[1].port, 6379);
    assert_eq!(config.nodes[1].weight, 5);

    clear_env(&[
        "REDIS_CLUSTER_ENABLED",
        "REDIS_CLUSTER_TYPE",
        "REDIS_CLUSTER_NODE_0_HOST",
        "REDIS_CLUSTER_NODE_0_PORT",
        "REDIS_CLUSTER_NODE_0_ROLE",
        "REDIS_CLUSTER_NODE_1_HOST",
        "REDIS_CLUSTER_NODE_1_ROLE",
        "REDIS_CLUSTER_NODE_1_WEIGHT",
    ]);
}

#[tokio::test]
async fn enabled_cluster_without_nodes_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("REDIS_CLUSTER_ENABLED", "true");
    std::env::set_var("REDIS_CLUSTER_TYPE", "cluster");
    clear_env(&["REDIS_CLUSTER_NODES", "REDIS_CLUSTER_NODE_0_HOST"]);

    assert!(ClusterConfig::from_env().is_err());

    clear_env(&["REDIS_CLUSTER_ENABLED", "REDIS_CLUSTER_TYPE"]);
}

#[tokio::test]
async fn size_strings_follow_the_documented_grammar() {
    assert_eq!(parse_size("512").unwrap(), 512);
    assert_eq!(parse_size("16K").unwrap(), 16 * 1024);
    assert_eq!(parse_size("256M").unwrap(), 256 * 1024 * 1024);
    assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    assert!(parse_size("1.5G").is_err());
    assert!(parse_size("-4K").is_err());
}
