//! In-process service orchestration
//!
//! Declare named units of work ("services"), each with its dependencies and a producer, then ask
//! a [`Registry`] for the value of one or several of them. The engine works out which
//! dependencies must run and in what order, runs independent services concurrently up to a
//! parallelism cap, caches results per service, applies retry and timeout policies, and drains
//! in-flight runs on shutdown.
//!
//! # Features
//!
//! - **Dependency resolution**: iterative depth-first ordering with cycle and missing-service
//!   detection, before anything executes. Dependencies may be a fixed list or a pure function
//!   of the run configuration.
//! - **Bounded concurrency**: every ready service is launched in graph order, up to a per-run
//!   cap. Cache hits never count against the cap.
//! - **Per-service caching**: keyed by the run configuration, bounded by age and entry count.
//! - **Execution policies**: retry with a predicate and delay, timeouts that bound either the
//!   whole retry sequence or each attempt, and error policies that substitute a value.
//! - **Three producer shapes**: synchronous functions, functions returning futures, and
//!   callback-style producers with an explicit [`Completion`] handle.
//! - **Graceful shutdown**: [`Registry::shutdown`] refuses new runs and waits for active ones;
//!   [`Registry::flush`] waits and then accepts runs again.
//!
//! # Quick Start
//!
//! ```no_run
//! use servgraph::{Registry, RetryPolicy};
//! use serde_json::json;
//!
//! # async {
//! let registry = Registry::new();
//!
//! registry
//!     .service("user")
//!     .provides(|config, _| Ok::<_, String>(config["user"].as_str().unwrap_or("anon").to_string()))
//!     .unwrap();
//!
//! registry
//!     .service("greeting")
//!     .depends_on(["user"])
//!     .retry(RetryPolicy::new().attempts(3))
//!     .provides(|_, deps| {
//!         let user = deps.try_get::<String>("user")?;
//!         Ok::<_, servgraph::EngineError>(format!("hello, {user}"))
//!     })
//!     .unwrap();
//!
//! let greeting: String = registry.run("greeting", json!({"user": "ada"})).await.unwrap();
//! assert_eq!(greeting, "hello, ada");
//! # };
//! ```
//!
//! # Core Concepts
//!
//! ## Services and producers
//!
//! A [`Service`] is defined through [`Registry::service`], which returns a [`ServiceBuilder`].
//! Its producer receives the run configuration and a [`Resolved`] map holding exactly the
//! values of its declared dependencies. Values are type-erased ([`Value`]) and retrieved with
//! a typed getter; a wrong type is reported as [`EngineError::TypeMismatch`].
//!
//! A panic inside a producer, whether raised while calling it or while polling its future, is
//! caught and reported as [`EngineError::ProducerPanicked`].
//!
//! ## Runs
//!
//! A run resolves one target ([`Registry::run`]) or a batch ([`Registry::run_many`]) against a
//! configuration: the registry's base configuration with the caller's extra configuration
//! merged on top. A run captures the registry's services when it starts, so redefinitions only
//! affect later runs.
//!
//! The first failure that no error policy absorbs fails the whole run, including every other
//! target of a batch. Services that had not started by then are never invoked; services already
//! running are left to finish on their own and their results are discarded.
//!
//! ## Timeouts
//!
//! Timeouts are driven by Tokio's timer and spawn the timed invocation onto the current Tokio
//! runtime, so services with a timeout or a retry delay must run inside one; outside a runtime
//! they fail with [`EngineError::RuntimeUnavailable`]. A timed-out invocation is not cancelled;
//! its eventual result is ignored and the retry sequence it belonged to starts no further
//! attempts.
//!
//! # Tracing
//!
//! Enable the `tracing` feature to emit diagnostics through the [`tracing`] crate:
//!
//! ```toml
//! [dependencies]
//! servgraph = { version = "0.1", features = ["tracing"] }
//! ```
//!
//! - **DEBUG**: graph resolution, run start and completion, service definition, retries
//! - **TRACE**: readiness decisions, cache lookups and stores, run registration
//! - **WARN**: timeouts, refused runs
//! - **ERROR**: run failures
//!
//! With the feature disabled every call site is compiled out. Independently of the feature, a
//! [`Logger`] callback installed on the registry receives a [`LifecycleEvent`] at every start,
//! success, error, cache hit and refused run.
//!
//! [`tracing`]: https://docs.rs/tracing

mod builder;
mod cache;
mod coordinator;
mod error;
mod events;
pub mod graph;
mod pipeline;
mod producer;
mod registry;
mod scheduler;
mod service;
mod settings;
mod types;

pub use builder::ServiceBuilder;
pub use cache::{Cache, CacheKey, CachePolicy, Lookup};
pub use coordinator::{Coordinator, RunTicket};
pub use error::{BoxError, EngineError, EngineResult};
pub use events::{EventKind, LifecycleEvent, Logger};
pub use graph::{resolve, Adjacency, AdjacencyOracle, FnOracle, Plan};
pub use pipeline::{Pipeline, RetryPolicy, Stage, TimeoutScope};
pub use producer::{Completion, Producer};
pub use registry::Registry;
pub use service::{Dependencies, ErrorPolicy, Service};
pub use settings::{RunOptions, Settings};
pub use types::{merge_config, value, Config, Resolved, RunId, RunOutputs, Value};
