//! Run scheduler.
//!
//! Drives one run to completion. The scheduler resolves the execution order for the run's
//! targets, then alternates between a readiness pass (scan the remaining services in graph
//! order and launch every one whose dependencies have all resolved) and waiting for the next
//! in-flight service to settle.
//!
//! All in-flight work is polled from the run's own future through a `FuturesUnordered`, so a
//! run is a single cooperative task: the solver and readiness passes never suspend, and
//! suspension only happens while waiting on producers, timers or a cache-hit tick.
//!
//! Several targets are modeled as dependencies of a synthetic aggregate node whose name can
//! never be registered.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

#[cfg(feature = "tracing")]
use tracing::{debug, error, trace};

use crate::error::{EngineError, EngineResult};
use crate::events::Emitter;
use crate::graph::{self, Adjacency, AdjacencyOracle, Plan};
use crate::service::{next_tick, Service, ServiceState};
use crate::types::{Config, Resolved, Value};

/// Name of the synthetic node depending on every target of a multi-target run.
pub(crate) const AGGREGATE: &str = "";

/// Services visible to a run, captured when the run starts.
pub(crate) type Snapshot = Arc<HashMap<String, Arc<Service>>>;

/// Answers adjacency queries from a service snapshot and a run configuration.
struct SnapshotOracle<'a> {
    services: &'a HashMap<String, Arc<Service>>,
    config: &'a Config,
    aggregate: Option<&'a [String]>,
}

impl AdjacencyOracle for SnapshotOracle<'_> {
    fn adjacency(&self, name: &str) -> impl std::future::Future<Output = Adjacency> + Send {
        let answer = match (name, self.aggregate) {
            (AGGREGATE, Some(targets)) => Adjacency::Dependencies(targets.to_vec()),
            _ => match self.services.get(name) {
                Some(service) => Adjacency::Dependencies(service.dependencies_for(self.config)),
                None => Adjacency::Missing,
            },
        };
        std::future::ready(answer)
    }
}

/// Execution order for `targets` over `services`; a single target is its own root.
pub(crate) async fn plan(
    services: &HashMap<String, Arc<Service>>,
    config: &Config,
    targets: &[String],
) -> EngineResult<Plan> {
    let (start, aggregate) = match targets {
        [single] => (single.as_str(), None),
        _ => (AGGREGATE, Some(targets)),
    };
    let oracle = SnapshotOracle {
        services,
        config,
        aggregate,
    };
    graph::resolve(&oracle, start).await
}

/// Everything one run needs, owned so the run future is `'static`.
pub(crate) struct RunState {
    pub(crate) services: Snapshot,
    pub(crate) config: Arc<Config>,
    pub(crate) parallelism: Option<usize>,
    pub(crate) emitter: Emitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Produced,
    Cached,
}

type Settled = (String, Dispatch, EngineResult<Value>);

impl RunState {
    /// Resolve the execution order for `targets` without running anything.
    pub(crate) async fn plan(&self, targets: &[String]) -> EngineResult<Plan> {
        plan(&self.services, &self.config, targets).await
    }

    /// Execute the run, returning the value of every target.
    ///
    /// # Errors
    ///
    /// Graph errors abort before any service executes. Otherwise the first failure no error
    /// policy absorbed fails the whole run; services that never became ready are not invoked.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(run = %self.emitter.run_id(), targets = targets.len()))
    )]
    pub(crate) async fn execute(
        self,
        targets: Vec<String>,
    ) -> EngineResult<HashMap<String, Value>> {
        let plan = self.plan(&targets).await?;
        let cap = self.parallelism.map_or(usize::MAX, |limit| limit.max(1));

        #[cfg(feature = "tracing")]
        debug!(services = plan.len(), cap, "execution order resolved");

        let mut remaining: Vec<String> = plan
            .order()
            .iter()
            .filter(|name| name.as_str() != AGGREGATE)
            .cloned()
            .collect();
        let mut states: HashMap<String, ServiceState> = remaining
            .iter()
            .map(|name| (name.clone(), ServiceState::NotStarted))
            .collect();
        let mut resolved: HashMap<String, Value> = HashMap::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Settled>> = FuturesUnordered::new();
        let mut producing = 0_usize;

        loop {
            if targets.iter().all(|t| resolved.contains_key(t)) {
                #[cfg(feature = "tracing")]
                debug!("run completed");

                if !in_flight.is_empty() {
                    detach(in_flight);
                }
                let outputs = targets
                    .iter()
                    .filter_map(|t| resolved.get(t).map(|v| (t.clone(), Arc::clone(v))))
                    .collect();
                return Ok(outputs);
            }

            // Readiness pass, left to right in graph order
            let mut blocked = false;
            let mut not_ready = Vec::with_capacity(remaining.len());
            for name in remaining.drain(..) {
                let ready = plan
                    .dependencies_of(&name)
                    .iter()
                    .all(|dep| resolved.contains_key(dep));
                if blocked || !ready {
                    not_ready.push(name);
                    continue;
                }

                let service = &self.services[&name];
                if let Some(value) = service.lookup(&self.config, &self.emitter) {
                    states.insert(name.clone(), ServiceState::Running);
                    in_flight.push(
                        async move {
                            next_tick().await;
                            (name, Dispatch::Cached, Ok(value))
                        }
                        .boxed(),
                    );
                    continue;
                }

                if producing >= cap {
                    #[cfg(feature = "tracing")]
                    trace!(service = %name, producing, "parallelism cap reached");

                    blocked = true;
                    not_ready.push(name);
                    continue;
                }

                let deps = plan
                    .dependencies_of(&name)
                    .iter()
                    .map(|dep| (dep.clone(), Arc::clone(&resolved[dep])))
                    .collect();
                producing += 1;
                states.insert(name.clone(), ServiceState::Running);
                in_flight.push(
                    service
                        .execute(
                            Arc::clone(&self.config),
                            Resolved::from_map(deps),
                            self.emitter.clone(),
                        )
                        .map(move |result| (name, Dispatch::Produced, result))
                        .boxed(),
                );
            }
            remaining = not_ready;

            let Some((name, dispatch, result)) = in_flight.next().await else {
                unreachable!(
                    "scheduler stalled with {} services pending and nothing in flight",
                    remaining.len()
                );
            };
            if dispatch == Dispatch::Produced {
                producing -= 1;
            }

            let state = match (&result, dispatch) {
                (Err(_), _) => ServiceState::Failed,
                (Ok(_), Dispatch::Cached) => ServiceState::Cached,
                (Ok(_), Dispatch::Produced) => ServiceState::Resolved,
            };
            if let Err(err) = settle(&mut states, &name, state) {
                #[cfg(feature = "tracing")]
                error!(service = %name, "duplicate completion");

                detach(in_flight);
                return Err(err);
            }

            match result {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    trace!(service = %name, cached = dispatch == Dispatch::Cached, "resolved");

                    resolved.insert(name, value);
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    error!(service = %name, error = %err, "run failed");

                    detach(in_flight);
                    return Err(err);
                }
            }

            debug_assert!(producing <= cap);
        }
    }
}

/// Record that `name` settled in `state`.
///
/// Each service is launched at most once per run, so a second result for a settled service
/// means a producer delivered twice; the run fails with `DuplicateCompletion`.
pub(crate) fn settle(
    states: &mut HashMap<String, ServiceState>,
    name: &str,
    state: ServiceState,
) -> EngineResult<()> {
    match states.get_mut(name) {
        Some(current) if current.is_settled() => Err(EngineError::DuplicateCompletion {
            name: name.to_string(),
        }),
        Some(current) => {
            *current = state;
            Ok(())
        }
        None => {
            states.insert(name.to_string(), state);
            Ok(())
        }
    }
}

/// Leave already launched services running to completion once the run no longer needs them.
///
/// A launched producer is never cancelled mid-flight. Without a Tokio runtime there is nowhere
/// to hand the work to, and it is dropped with the run.
fn detach(in_flight: FuturesUnordered<BoxFuture<'static, Settled>>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        for fut in in_flight {
            handle.spawn(fut);
        }
    }
}
