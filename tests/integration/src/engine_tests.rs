//! Contract laws that must hold for every engine implementation.

use crate::helpers::*;
use cache_core::CacheError;
use std::time::Duration;

/// A set value reads back until TTL expiry or explicit delete
#[tokio::test]
async fn round_trip_holds_for_every_engine() {
    init_tracing();
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let k = key("law.roundtrip");
        engine.set(&k, b"value", 0).await.unwrap();
        assert_eq!(
            engine.get(&k).await.unwrap(),
            Some(b"value".to_vec()),
            "round-trip failed on {name}"
        );

        engine.set(&k, b"replaced", 0).await.unwrap();
        assert_eq!(
            engine.get(&k).await.unwrap(),
            Some(b"replaced".to_vec()),
            "overwrite failed on {name}"
        );
    }
}

/// The second delete of the same key reports false
#[tokio::test]
async fn delete_is_idempotent_on_every_engine() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let k = key("law.idempotent");
        engine.set(&k, b"v", 0).await.unwrap();
        assert!(engine.delete(&k).await.unwrap(), "first delete on {name}");
        assert!(
            !engine.delete(&k).await.unwrap(),
            "second delete must be false on {name}"
        );
    }
}

/// Concurrent adds admit exactly one winner
#[tokio::test]
async fn add_is_exclusive_on_every_engine() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let k = key("law.exclusive");
        let mut joins = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            let k = k.clone();
            joins.push(tokio::spawn(async move {
                engine
                    .add(&k, format!("claim-{i}").as_bytes(), 30)
                    .await
                    .unwrap_or(false)
            }));
        }

        let mut winners = 0;
        for join in joins {
            if join.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "expected one add winner on {name}");

        // The surviving value is one of the claims, unmixed.
        let value = engine.get(&k).await.unwrap().unwrap();
        let text = String::from_utf8(value).unwrap();
        assert!(text.starts_with("claim-"), "mixed value on {name}: {text}");
    }
}

/// Expired entries read as absent and stop counting
#[tokio::test]
async fn ttl_expiry_removes_entries_on_every_engine() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let short = key("law.short");
        let long = key("law.long");
        engine.set(&short, b"v", 1).await.unwrap();
        engine.set(&long, b"v", 100).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(engine.get(&short).await.unwrap(), None, "expiry on {name}");
        assert_eq!(engine.count().await.unwrap(), 1, "count on {name}");
        engine.clear().await.unwrap();
    }
}

/// Batched gets mirror the request order
#[tokio::test]
async fn get_multiple_preserves_request_order_on_every_engine() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let entries = vec![
            (key("law.order.a"), b"1".to_vec()),
            (key("law.order.b"), b"2".to_vec()),
        ];
        engine.set_multiple(&entries, 0).await.unwrap();

        let request = vec![key("law.order.b"), key("law.order.missing"), key("law.order.a")];
        let values = engine.get_multiple(&request).await.unwrap();
        assert_eq!(
            values,
            vec![Some(b"2".to_vec()), None, Some(b"1".to_vec())],
            "order violated on {name}"
        );
        engine.clear().await.unwrap();
    }
}

/// Increment unifies across engines: numeric update, TypeMismatch on
/// non-numeric
#[tokio::test]
async fn increment_semantics_match_across_engines() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let counter = key("law.counter");
        assert_eq!(engine.increment(&counter, 5).await.unwrap(), 5);
        assert_eq!(engine.increment(&counter, -8).await.unwrap(), -3);
        assert_eq!(
            engine.get(&counter).await.unwrap(),
            Some(b"-3".to_vec()),
            "ASCII decimal storage on {name}"
        );

        let blob = key("law.blob");
        engine.set(&blob, b"free text", 0).await.unwrap();
        assert!(
            matches!(
                engine.increment(&blob, 1).await,
                Err(CacheError::TypeMismatch { .. })
            ),
            "type mismatch on {name}"
        );
        engine.clear().await.unwrap();
    }
}

/// Touch extends life; expired and absent keys refuse the touch
#[tokio::test]
async fn touch_applies_only_to_live_entries() {
    let (_dir, engines) = contract_engines();

    for (name, engine) in engines {
        let k = key("law.touch");
        engine.set(&k, b"v", 100).await.unwrap();
        assert!(engine.touch(&k, 200).await.unwrap(), "touch live on {name}");
        assert!(
            !engine.touch(&key("law.touch.absent"), 200).await.unwrap(),
            "touch absent on {name}"
        );
        engine.clear().await.unwrap();
    }
}
