//! Cross-run caching tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use servgraph::{CacheKey, CachePolicy, Config, EventKind, Registry, Resolved};

use crate::common::{counter, sum, EventLog};

fn cached(registry: &Registry, name: &str, policy: CachePolicy) -> Arc<AtomicUsize> {
    let calls = counter();
    let seen = calls.clone();
    registry
        .service(name)
        .cache(policy)
        .provides(move |config: &Config, _: &Resolved| {
            let n = seen.fetch_add(1, Ordering::SeqCst) as i64;
            Ok::<_, String>(config["x"].as_i64().unwrap_or(0) * 100 + n)
        })
        .unwrap();
    calls
}

#[tokio::test]
async fn test_constant_key_caches_first_result() {
    let registry = Registry::new();
    let calls = cached(&registry, "svc", CachePolicy::default());

    let first: i64 = registry.run("svc", json!({"x": 1})).await.unwrap();
    let second: i64 = registry.run("svc", json!({"x": 2})).await.unwrap();

    assert_eq!(first, 100);
    assert_eq!(second, 100);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_field_key_separates_configs() {
    let registry = Registry::new();
    let calls = cached(&registry, "svc", CachePolicy::new(CacheKey::field("x")));

    let a: i64 = registry.run("svc", json!({"x": 1})).await.unwrap();
    let b: i64 = registry.run("svc", json!({"x": 2})).await.unwrap();
    let a_again: i64 = registry.run("svc", json!({"x": 1, "noise": true})).await.unwrap();

    assert_eq!((a, b, a_again), (100, 201, 100));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_function_key() {
    let registry = Registry::new();
    let calls = cached(
        &registry,
        "svc",
        CachePolicy::new(CacheKey::function(|config: &Config| {
            (config["x"].as_i64().unwrap_or(0) % 2).to_string()
        })),
    );

    registry.run::<i64>("svc", json!({"x": 1})).await.unwrap();
    registry.run::<i64>("svc", json!({"x": 3})).await.unwrap();
    registry.run::<i64>("svc", json!({"x": 2})).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_max_entries_evicts_oldest() {
    let registry = Registry::new();
    let calls = cached(
        &registry,
        "svc",
        CachePolicy::new(CacheKey::field("x")).max_entries(2),
    );

    for x in [1, 2, 3] {
        registry.run::<i64>("svc", json!({ "x": x })).await.unwrap();
    }
    // 1 was evicted by 3; 3 is still held
    registry.run::<i64>("svc", json!({"x": 3})).await.unwrap();
    registry.run::<i64>("svc", json!({"x": 1})).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(registry.get("svc").unwrap().cache().unwrap().len(), 2);
}

#[tokio::test]
async fn test_max_age_expires_entries() {
    let registry = Registry::new();
    let calls = cached(
        &registry,
        "svc",
        CachePolicy::default().max_age(Duration::from_millis(30)),
    );

    registry.run::<i64>("svc", Config::Null).await.unwrap();
    registry.run::<i64>("svc", Config::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    registry.run::<i64>("svc", Config::Null).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_hit_returns_the_stored_value() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    let calls = cached(&registry, "base", CachePolicy::default());

    let first = registry.run_value("base", Config::Null).await.unwrap();
    let second = registry.run_value("base", Config::Null).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(events.count(EventKind::CacheHit), 1);
}

#[tokio::test]
async fn test_cached_dependency_feeds_dependents() {
    let registry = Registry::new();
    let calls = counter();
    let seen = calls.clone();
    registry
        .service("base")
        .cache(CachePolicy::default())
        .provides(move |_: &Config, _: &Resolved| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(4_i32)
        })
        .unwrap();
    sum(&registry, "top", &["base"]);

    let first: i32 = registry.run("top", Config::Null).await.unwrap();
    let second: i32 = registry.run("top", Config::Null).await.unwrap();

    assert_eq!((first, second), (4, 4));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let attempts = counter();
    let seen = attempts.clone();
    let registry = Registry::new();
    registry
        .service("svc")
        .cache(CachePolicy::default())
        .provides(move |_: &Config, _: &Resolved| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("cold start")
            } else {
                Ok(7_i32)
            }
        })
        .unwrap();

    assert!(registry.run::<i32>("svc", Config::Null).await.is_err());
    assert_eq!(registry.run::<i32>("svc", Config::Null).await.unwrap(), 7);
    assert_eq!(registry.run::<i32>("svc", Config::Null).await.unwrap(), 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
