//! Multi-target run tests

use std::sync::atomic::Ordering;

use servgraph::{Config, EngineError, EngineResult, Registry, Resolved};

use crate::common::{constant, counter, failing, sum};

#[tokio::test]
async fn test_returns_every_target() -> EngineResult<()> {
    let registry = Registry::new();
    constant(&registry, "a", 1);
    constant(&registry, "b", 2);
    sum(&registry, "c", &["a", "b"]);

    let outputs = registry.run_many(["c", "a"], Config::Null).await?;

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs.get::<i32>("c")?, 3);
    assert_eq!(outputs.get::<i32>("a")?, 1);
    assert!(outputs.raw("b").is_none());
    Ok(())
}

#[tokio::test]
async fn test_shared_dependency_runs_once() -> EngineResult<()> {
    let calls = counter();
    let registry = Registry::new();
    let seen = calls.clone();
    registry
        .service("shared")
        .provides(move |_: &Config, _: &Resolved| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(10_i32)
        })?;
    sum(&registry, "x", &["shared"]);
    sum(&registry, "y", &["shared"]);

    let outputs = registry.run_many(["x", "y"], Config::Null).await?;

    assert_eq!(outputs.get::<i32>("x")?, 10);
    assert_eq!(outputs.get::<i32>("y")?, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_one_failure_fails_the_batch() {
    let registry = Registry::new();
    constant(&registry, "fine", 1);
    failing(&registry, "broken", &[], "nope");

    let err = registry
        .run_many(["fine", "broken"], Config::Null)
        .await
        .unwrap_err();

    assert_eq!(err.unit(), Some("broken"));
}

#[tokio::test]
async fn test_unknown_target() {
    let registry = Registry::new();
    constant(&registry, "a", 1);

    let err = registry
        .run_many(["a", "ghost"], Config::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MissingDependency { ref name } if name == "ghost"));
}

#[tokio::test]
async fn test_output_requested_for_non_target() -> EngineResult<()> {
    let registry = Registry::new();
    constant(&registry, "a", 1);

    let outputs = registry.run_many(["a"], Config::Null).await?;

    assert!(matches!(
        outputs.get::<i32>("b"),
        Err(EngineError::MissingDependency { .. })
    ));
    assert!(matches!(
        outputs.get::<String>("a"),
        Err(EngineError::TypeMismatch { .. })
    ));
    Ok(())
}
