//! End-to-end scenarios through the facade and the memory engine.

use crate::helpers::*;
use cache_config::MemoryConfig;
use cache_core::METADATA_OVERHEAD;
use cache_memory::MemoryStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Budget that holds exactly `n` single-byte-key, single-byte-value
/// entries
fn tight_budget(n: u64) -> u64 {
    n * (1 + 1 + METADATA_OVERHEAD)
}

/// With a budget sized for exactly {a,b,c}, touching `a` and then
/// inserting `d` must evict `b`.
#[tokio::test]
async fn lru_eviction_under_tight_budget() {
    let store = MemoryStore::new(tight_budget(3), Duration::from_secs(300));

    store.set("a", b"1", 0);
    store.set("b", b"2", 0);
    store.set("c", b"3", 0);
    assert!(store.get("a").is_some());
    store.set("d", b"4", 0);

    assert!(store.get("a").is_some(), "a was refreshed and must survive");
    assert!(store.get("b").is_none(), "b was LRU and must be evicted");
    assert!(store.get("c").is_some());
    assert!(store.get("d").is_some());
}

/// Concurrent adds through the facade admit one winner and an unmixed value
#[tokio::test]
async fn concurrent_add_admits_one_winner() {
    let cache = memory_cache();

    let a = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .add("k", b"A", Some(Duration::from_secs(10)))
                .await
                .unwrap()
        })
    };
    let b = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .add("k", b"B", Some(Duration::from_secs(10)))
                .await
                .unwrap()
        })
    };

    let (won_a, won_b) = (a.await.unwrap(), b.await.unwrap());
    assert!(won_a ^ won_b, "exactly one add must win");

    let value = cache.get("k").await.unwrap().unwrap();
    assert!(value == b"A".to_vec() || value == b"B".to_vec());
}

/// Cleanup reclaims the expired entry and leaves the live one
#[tokio::test]
async fn cleanup_sweeps_expired_entries() {
    let store = MemoryStore::from_config(&MemoryConfig::default());

    store.set("x", b"v", 1);
    store.set("y", b"v", 100);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(store.cleanup() >= 1);
    assert_eq!(store.get("x"), None);
    assert_eq!(store.get("y"), Some(b"v".to_vec()));
}

/// Three sequential remember calls trigger exactly one computation
#[tokio::test]
async fn remember_computes_once() {
    let cache = memory_cache();
    let counter = AtomicU32::new(0);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let value = cache
            .remember("expensive", Some(Duration::from_secs(60)), || async {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("generation-{n}").into_bytes()
            })
            .await
            .unwrap();
        seen.push(value);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(seen.iter().all(|v| v == &seen[0]));
}

/// Key validation law across the facade surface
#[tokio::test]
async fn invalid_keys_are_rejected_everywhere() {
    use cache_core::CacheError;

    let cache = memory_cache();
    let oversized = "k".repeat(251);
    let invalid = [
        "", "a{b", "a}b", "a(b", "a)b", "a/b", "a@b", "a:b", "a\"b", oversized.as_str(),
    ];

    for bad in invalid {
        assert!(
            matches!(cache.get(bad).await, Err(CacheError::InvalidKey { .. })),
            "get accepted invalid key {bad:?}"
        );
        assert!(
            matches!(
                cache.set(bad, b"v", None).await,
                Err(CacheError::InvalidKey { .. })
            ),
            "set accepted invalid key {bad:?}"
        );
        assert!(
            matches!(
                cache.get_multiple(&["fine", bad]).await,
                Err(CacheError::InvalidKey { .. })
            ),
            "get_multiple accepted invalid key {bad:?}"
        );
    }
}

/// The facade counts engine-acknowledged stores only
#[tokio::test]
async fn batched_set_statistics_count_successes() {
    let cache = memory_cache();
    let stored = cache
        .set_multiple(
            &[
                ("batch.a", b"1".as_slice()),
                ("batch.b", b"2".as_slice()),
                ("batch.c", b"3".as_slice()),
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(stored, 3);
    assert_eq!(cache.stats().sets, 3);
}
