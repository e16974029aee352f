//! Fan-out pattern benchmarks (1 → N dependents)

use std::sync::Arc;

use criterion::Criterion;
use servgraph::{Config, Registry, Resolved};

fn fanout<T, F>(source: F, consume: fn(&T, usize) -> usize) -> (Registry, Vec<String>)
where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let registry = Registry::new();
    registry
        .service("source")
        .provides(move |_: &Config, _: &Resolved| Ok::<_, String>(source()))
        .unwrap();

    let names: Vec<String> = (0..100).map(|i| format!("d{i}")).collect();
    for (i, name) in names.iter().enumerate() {
        registry
            .service(name.as_str())
            .depends_on(["source"])
            .provides(move |_: &Config, deps: &Resolved| {
                deps.try_get::<T>("source").map(|value| consume(value, i))
            })
            .unwrap();
    }
    (registry, names)
}

pub fn bench_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let (registry, names) = fanout(|| 42_usize, |x, i| x + i);
    c.bench_function("fanout_1_to_100_usize", |b| {
        b.iter(|| {
            rt.block_on(registry.run_many(names.clone(), Config::Null))
                .unwrap()
        });
    });

    // Dependents share one stored value; nothing is cloned per consumer
    let (registry, names) = fanout(
        || Arc::new((0..1000).map(|i| format!("Item {i}")).collect::<Vec<_>>()),
        |data, i| data.iter().filter(|s| s.contains(&i.to_string())).count(),
    );
    c.bench_function("fanout_1_to_100_vec", |b| {
        b.iter(|| {
            rt.block_on(registry.run_many(names.clone(), Config::Null))
                .unwrap()
        });
    });
}
