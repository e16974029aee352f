//! Lifecycle event tests

use chrono::Utc;
use serde_json::json;
use servgraph::{CacheKey, CachePolicy, Config, ErrorPolicy, EventKind, Registry, Resolved};

use crate::common::{constant, failing, sum, EventLog};

fn pair(unit: &str, kind: EventKind) -> (String, EventKind) {
    (unit.to_string(), kind)
}

#[tokio::test]
async fn test_events_follow_execution_order() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    constant(&registry, "a", 1);
    sum(&registry, "b", &["a"]);

    registry.run::<i32>("b", Config::Null).await.unwrap();

    assert_eq!(
        events.summary(),
        vec![
            pair("a", EventKind::Start),
            pair("a", EventKind::Success),
            pair("b", EventKind::Start),
            pair("b", EventKind::Success),
        ]
    );
}

#[tokio::test]
async fn test_cache_hit_replaces_start_and_success() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    registry
        .service("a")
        .cache(CachePolicy::new(CacheKey::field("k")))
        .provides(|_: &Config, _: &Resolved| Ok::<_, String>(1_i32))
        .unwrap();

    registry.run::<i32>("a", json!({"k": "x"})).await.unwrap();
    registry.run::<i32>("a", json!({"k": "x"})).await.unwrap();

    let log = events.events();
    assert_eq!(
        log.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![EventKind::Start, EventKind::Success, EventKind::CacheHit]
    );
    assert_eq!(log[2].payload, "x");
}

#[tokio::test]
async fn test_failure_is_reported_with_message() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    failing(&registry, "broken", &[], "disk full");

    let _ = registry.run::<i32>("broken", Config::Null).await;

    let log = events.events();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].kind, EventKind::Error);
    assert!(log[1].payload.contains("disk full"));
}

#[tokio::test]
async fn test_absorbed_failure_reports_twice() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    registry
        .service("guarded")
        .on_error(ErrorPolicy::fixed(0_i32))
        .provides(|_: &Config, _: &Resolved| Err::<i32, _>("nope"))
        .unwrap();

    registry.run::<i32>("guarded", Config::Null).await.unwrap();

    assert_eq!(
        events.summary(),
        vec![
            pair("guarded", EventKind::Start),
            pair("guarded", EventKind::Error),
            pair("guarded", EventKind::Error),
        ]
    );
}

#[tokio::test]
async fn test_events_carry_run_id_and_timestamp() {
    let events = EventLog::default();
    let registry = events.install(Registry::new());
    constant(&registry, "a", 1);

    let before = Utc::now();
    registry.run::<i32>("a", Config::Null).await.unwrap();
    registry.run::<i32>("a", Config::Null).await.unwrap();
    let after = Utc::now();

    let log = events.events();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0].run_id, log[1].run_id);
    assert_ne!(log[1].run_id, log[2].run_id);
    assert!(log.iter().all(|e| e.timestamp >= before && e.timestamp <= after));
    assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_logger_can_be_replaced_and_removed() {
    let first = EventLog::default();
    let registry = first.install(Registry::new());
    constant(&registry, "a", 1);
    registry.run::<i32>("a", Config::Null).await.unwrap();

    registry.set_logger(None);
    registry.run::<i32>("a", Config::Null).await.unwrap();

    assert_eq!(first.events().len(), 2);
}
