//! Tests that the library works correctly without tracing feature

use servgraph::{Config, Registry};

use crate::common::{constant, sum};

#[tokio::test(flavor = "multi_thread")]
async fn test_basic_run_without_tracing() {
    let registry = Registry::new();
    constant(&registry, "a", 2);
    constant(&registry, "b", 3);
    sum(&registry, "c", &["a", "b"]);

    assert_eq!(registry.run::<i32>("c", Config::Null).await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_many_without_tracing() {
    let registry = Registry::new();
    constant(&registry, "a", 2);
    sum(&registry, "b", &["a"]);

    let outputs = registry.run_many(["a", "b"], Config::Null).await.unwrap();

    assert_eq!(outputs.get::<i32>("a").unwrap(), 2);
    assert_eq!(outputs.get::<i32>("b").unwrap(), 2);
}
