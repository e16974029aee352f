// Common test utilities and helpers for the test suite

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servgraph::{Config, EventKind, LifecycleEvent, Registry, Resolved};

/// Register a service producing `value` with no dependencies.
pub fn constant(registry: &Registry, name: &str, value: i32) {
    registry
        .service(name)
        .provides(move |_: &Config, _: &Resolved| Ok::<_, String>(value))
        .unwrap();
}

/// Register a service summing the `i32` values of `deps`.
pub fn sum(registry: &Registry, name: &str, deps: &[&str]) {
    let names: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    let inputs = names.clone();
    registry
        .service(name)
        .depends_on(names)
        .provides(move |_: &Config, resolved: &Resolved| {
            inputs
                .iter()
                .map(|n| resolved.try_get::<i32>(n).copied())
                .sum::<Result<i32, _>>()
        })
        .unwrap();
}

/// Register a service failing with `message`.
pub fn failing(registry: &Registry, name: &str, deps: &[&str], message: &'static str) {
    registry
        .service(name)
        .depends_on(deps.iter().copied())
        .provides(move |_: &Config, _: &Resolved| Err::<i32, _>(message))
        .unwrap();
}

/// Register a service that sleeps for `delay`, counting invocations in `calls`.
pub fn sleeper(registry: &Registry, name: &str, delay: Duration, calls: Arc<AtomicUsize>) {
    registry
        .service(name)
        .provides_async(move |_: Arc<Config>, _: Resolved| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                Ok::<_, String>(1_i32)
            }
        })
        .unwrap();
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Collects lifecycle events emitted by a registry.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl EventLog {
    pub fn install(&self, registry: Registry) -> Registry {
        let events = Arc::clone(&self.events);
        registry.with_logger(move |event| events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// `(unit, kind)` pairs in emission order.
    pub fn summary(&self) -> Vec<(String, EventKind)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.unit.clone(), e.kind))
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}
