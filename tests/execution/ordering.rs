//! Execution order tests

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use servgraph::{Config, EngineResult, Registry, Resolved};

use crate::common::{constant, sum};

/// Register `name` so that it appends itself to `log` when invoked.
fn logged(
    registry: &Registry,
    name: &'static str,
    deps: &[&str],
    log: &Arc<Mutex<Vec<&'static str>>>,
) {
    let log = Arc::clone(log);
    registry
        .service(name)
        .depends_on(deps.iter().copied())
        .provides(move |_: &Config, _: &Resolved| {
            log.lock().push(name);
            Ok::<_, String>(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_scenario_order() -> EngineResult<()> {
    let registry = Registry::new();
    constant(&registry, "A", 1);
    constant(&registry, "B", 2);
    sum(&registry, "C", &["A", "B"]);

    let order = registry.execution_order("C", Config::Null).await?;

    assert!(order == ["A", "B", "C"] || order == ["B", "A", "C"]);
    Ok(())
}

#[tokio::test]
async fn test_dependents_start_after_dependencies() -> EngineResult<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    logged(&registry, "fetch", &[], &log);
    logged(&registry, "parse", &["fetch"], &log);
    logged(&registry, "index", &["parse"], &log);
    logged(&registry, "thumbnail", &["fetch"], &log);
    logged(&registry, "publish", &["index", "thumbnail"], &log);

    registry.run_many(["publish"], Config::Null).await?;

    let log = log.lock();
    let at = |name: &str| log.iter().position(|n| *n == name).unwrap();
    assert_eq!(log.len(), 5);
    assert!(at("fetch") < at("parse"));
    assert!(at("parse") < at("index"));
    assert!(at("fetch") < at("thumbnail"));
    assert!(at("index") < at("publish"));
    assert!(at("thumbnail") < at("publish"));
    Ok(())
}

#[tokio::test]
async fn test_unrelated_services_are_not_run() -> EngineResult<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    logged(&registry, "needed", &[], &log);
    logged(&registry, "target", &["needed"], &log);
    logged(&registry, "bystander", &[], &log);

    registry.run_many(["target"], Config::Null).await?;

    assert_eq!(*log.lock(), vec!["needed", "target"]);
    Ok(())
}

#[tokio::test]
async fn test_order_depends_on_config() -> EngineResult<()> {
    let registry = Registry::new();
    constant(&registry, "sqlite", 1);
    constant(&registry, "postgres", 2);
    registry
        .service("db")
        .depends_on_fn(|config: &Config| {
            vec![config["backend"].as_str().unwrap_or("sqlite").to_string()]
        })
        .provides(|_: &Config, deps: &Resolved| Ok::<_, String>(deps.len()))?;

    let local = registry.execution_order("db", Config::Null).await?;
    let remote = registry
        .execution_order("db", json!({"backend": "postgres"}))
        .await?;
    let value: i32 = registry.run("postgres", Config::Null).await?;

    assert_eq!(local, ["sqlite", "db"]);
    assert_eq!(remote, ["postgres", "db"]);
    assert_eq!(value, 2);
    Ok(())
}
