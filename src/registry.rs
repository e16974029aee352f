//! The service registry and run entry points.
//!
//! A [`Registry`] is an explicit handle owning a set of services, a base configuration, engine
//! [`Settings`], an optional lifecycle [`Logger`] and the [`Coordinator`] tracking its runs.
//! There is no process-wide state: every entry point goes through a registry.
//!
//! Runs are copy-on-run. Starting a run captures the current service map, configuration,
//! settings and logger, so the returned future is `'static` and redefining or removing a
//! service never affects a run that has already started.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::builder::ServiceBuilder;
use crate::cache::Cache;
use crate::coordinator::{Coordinator, RunTicket};
use crate::error::{EngineError, EngineResult};
use crate::events::{Emitter, EventKind, LifecycleEvent, Logger};
use crate::graph::Plan;
use crate::scheduler::{self, RunState, Snapshot};
use crate::service::Service;
use crate::settings::{RunOptions, Settings};
use crate::types::{downcast_cloned, merge_config, Config, Resolved, RunId, RunOutputs, Value};

/// Run id attached to events of runs refused before they were assigned one.
const REFUSED_RUN: RunId = RunId(0);

/// Explicit registry of services.
///
/// # Examples
///
/// ```no_run
/// # use servgraph::Registry;
/// # use serde_json::json;
/// # async {
/// let registry = Registry::new();
/// registry.service("a").provides(|_, _| Ok::<_, String>(1_i32)).unwrap();
/// registry.service("b").provides(|_, _| Ok::<_, String>(2_i32)).unwrap();
/// registry
///     .service("sum")
///     .depends_on(["a", "b"])
///     .provides(|_, deps| {
///         let a = deps.try_get::<i32>("a")?;
///         let b = deps.try_get::<i32>("b")?;
///         Ok::<_, servgraph::EngineError>(a + b)
///     })
///     .unwrap();
///
/// let sum: i32 = registry.run("sum", json!({})).await.unwrap();
/// assert_eq!(sum, 3);
///
/// let outputs = registry.run_many(["a", "sum"], json!({})).await.unwrap();
/// assert_eq!(outputs.get::<i32>("a").unwrap(), 1);
/// # };
/// ```
pub struct Registry {
    services: RwLock<Snapshot>,
    base_config: RwLock<Config>,
    settings: RwLock<Settings>,
    logger: RwLock<Option<Logger>>,
    coordinator: Coordinator,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry with default settings and an empty object as base configuration.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Arc::new(HashMap::new())),
            base_config: RwLock::new(Config::Object(Default::default())),
            settings: RwLock::new(Settings::default()),
            logger: RwLock::new(None),
            coordinator: Coordinator::new(),
        }
    }

    pub fn with_settings(self, settings: Settings) -> Self {
        *self.settings.write() = settings;
        self
    }

    pub fn with_config(self, config: Config) -> Self {
        *self.base_config.write() = config;
        self
    }

    pub fn with_logger<F>(self, logger: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        *self.logger.write() = Some(Arc::new(logger));
        self
    }

    pub fn settings(&self) -> Settings {
        *self.settings.read()
    }

    /// Change the per-run parallelism cap for runs started from now on; `None` is unbounded.
    pub fn set_parallelism(&self, limit: Option<usize>) {
        self.settings.write().parallelism = limit;
    }

    pub fn set_logger(&self, logger: Option<Logger>) {
        *self.logger.write() = logger;
    }

    pub fn set_base_config(&self, config: Config) {
        *self.base_config.write() = config;
    }

    pub fn base_config(&self) -> Config {
        self.base_config.read().clone()
    }

    /// Start defining the service `name`.
    pub fn service(&self, name: impl Into<String>) -> ServiceBuilder<'_> {
        ServiceBuilder::new(self, name.into())
    }

    pub(crate) fn insert(&self, service: Service) {
        let mut services = self.services.write();
        Arc::make_mut(&mut *services).insert(service.name().to_string(), Arc::new(service));
    }

    /// Remove a service. Runs already started keep the definition they captured.
    pub fn remove(&self, name: &str) -> Option<Arc<Service>> {
        let mut services = self.services.write();
        if !services.contains_key(name) {
            return None;
        }
        Arc::make_mut(&mut *services).remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Names referenced as dependencies but never registered, sorted and deduplicated.
    ///
    /// Computed dependencies are evaluated against the base configuration.
    pub fn missing_dependencies(&self) -> Vec<String> {
        let services = self.snapshot();
        let config = self.base_config();
        let mut missing: Vec<String> = services
            .values()
            .flat_map(|service| service.dependencies_for(&config))
            .filter(|dep| !services.contains_key(dep))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Execution order for `name` under the base configuration merged with `extra`.
    ///
    /// Nothing is executed and no run is registered.
    pub fn execution_order(
        &self,
        name: &str,
        extra: Config,
    ) -> BoxFuture<'static, EngineResult<Vec<String>>> {
        let services = self.snapshot();
        let config = merge_config(&self.base_config.read(), extra);
        let targets = vec![name.to_string()];
        async move {
            scheduler::plan(&services, &config, &targets)
                .await
                .map(Plan::into_order)
        }
        .boxed()
    }

    /// Run `name` and return its value as a `T`.
    ///
    /// # Errors
    ///
    /// Any failure of the run, or [`EngineError::TypeMismatch`] if the value is not a `T`.
    pub fn run<T: Any + Send + Sync + Clone>(
        &self,
        name: &str,
        extra: Config,
    ) -> BoxFuture<'static, EngineResult<T>> {
        let name = name.to_string();
        let run = self.run_value(&name, extra);
        async move { downcast_cloned(&name, &run.await?) }.boxed()
    }

    /// Run `name` and return its type-erased value.
    pub fn run_value(&self, name: &str, extra: Config) -> BoxFuture<'static, EngineResult<Value>> {
        let name = name.to_string();
        let run = self.start(vec![name.clone()], extra, RunOptions::default());
        async move {
            let mut outputs = run.await?.into_inner();
            outputs
                .remove(&name)
                .ok_or(EngineError::MissingDependency { name })
        }
        .boxed()
    }

    /// Run several targets as one batch; any failure fails the whole batch.
    pub fn run_many<I, S>(
        &self,
        names: I,
        extra: Config,
    ) -> BoxFuture<'static, EngineResult<RunOutputs>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_many_with(names, extra, RunOptions::default())
    }

    /// [`Registry::run_many`] with per-run overrides.
    pub fn run_many_with<I, S>(
        &self,
        names: I,
        extra: Config,
        options: RunOptions,
    ) -> BoxFuture<'static, EngineResult<RunOutputs>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let targets: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| seen.insert(name.clone()))
            .collect();
        self.start(targets, extra, options)
    }

    /// Callback-style entry point.
    ///
    /// The run is handed to `spawner` as a boxed future; `callback` receives the outcome once
    /// that future completes. A refused run still goes through the spawner and reports
    /// [`EngineError::ShuttingDown`].
    ///
    /// ```no_run
    /// # use servgraph::Registry;
    /// # let registry = Registry::new();
    /// registry.run_with_callback(
    ///     ["report"],
    ///     serde_json::Value::Null,
    ///     |fut| {
    ///         tokio::spawn(fut);
    ///     },
    ///     |outcome| println!("finished: {}", outcome.is_ok()),
    /// );
    /// ```
    pub fn run_with_callback<I, S, Sp, C>(&self, names: I, extra: Config, spawner: Sp, callback: C)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        Sp: FnOnce(BoxFuture<'static, ()>),
        C: FnOnce(EngineResult<RunOutputs>) + Send + 'static,
    {
        let run = self.run_many(names, extra);
        spawner(async move { callback(run.await) }.boxed());
    }

    /// Resolve one service outside of a graph run: cache, pipeline and error policy apply, but
    /// dependencies are taken from `deps` as given.
    ///
    /// The invocation is tracked like a run, so shutdown waits for it.
    pub fn invoke_service(
        &self,
        name: &str,
        extra: Config,
        deps: Resolved,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        let targets = [name.to_string()];
        let prepared = self.prepare(&targets, extra, RunOptions::default());
        let [name] = targets;
        async move {
            let (_ticket, run) = prepared?;
            let service = run
                .services
                .get(&name)
                .cloned()
                .ok_or(EngineError::MissingDependency { name })?;
            service.invoke(run.config, deps, run.emitter).await
        }
        .boxed()
    }

    /// Drop every cached entry of `name`. Returns `false` if it has no cache.
    pub fn reset_cache(&self, name: &str) -> bool {
        self.with_cache(name, Cache::reset)
    }

    /// Stop caching for `name` and drop its entries. Returns `false` if it has no cache.
    pub fn disable_cache(&self, name: &str) -> bool {
        self.with_cache(name, Cache::disable)
    }

    /// Resume caching for `name`, starting empty. Returns `false` if it has no cache.
    pub fn enable_cache(&self, name: &str) -> bool {
        self.with_cache(name, Cache::enable)
    }

    pub fn reset_all_caches(&self) {
        for service in self.snapshot().values() {
            if let Some(cache) = service.cache() {
                cache.reset();
            }
        }
    }

    /// Refuse new runs and wait for the active ones to finish.
    ///
    /// New runs are refused as soon as this returns; awaiting the future waits for drainage.
    /// Failures of the drained runs are reported to their own callers only.
    pub fn shutdown(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        #[cfg(feature = "tracing")]
        debug!(active = self.coordinator.active_runs(), "registry shutting down");

        self.coordinator.shutdown()
    }

    /// Wait for every active run to finish, then accept runs again.
    pub async fn flush(&self) {
        self.coordinator.flush().await;
    }

    pub fn active_runs(&self) -> usize {
        self.coordinator.active_runs()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.coordinator.is_shutting_down()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.services.read())
    }

    fn with_cache(&self, name: &str, f: impl FnOnce(&Cache)) -> bool {
        match self.get(name).as_deref().and_then(Service::cache) {
            Some(cache) => {
                f(cache);
                true
            }
            None => false,
        }
    }

    /// Register a run and capture everything it needs.
    fn prepare(
        &self,
        targets: &[String],
        extra: Config,
        options: RunOptions,
    ) -> EngineResult<(RunTicket, RunState)> {
        let logger = self.logger.read().clone();
        let ticket = match self.coordinator.begin() {
            Ok(ticket) => ticket,
            Err(err) => {
                #[cfg(feature = "tracing")]
                warn!(targets = ?targets, "run refused: {err}");

                let emitter = Emitter::new(logger, REFUSED_RUN);
                for target in targets {
                    emitter.emit(target, EventKind::AccessDenied, err.to_string());
                }
                return Err(err);
            }
        };

        let run = RunState {
            services: self.snapshot(),
            config: Arc::new(merge_config(&self.base_config.read(), extra)),
            parallelism: options.parallelism.or(self.settings.read().parallelism),
            emitter: Emitter::new(logger, ticket.id()),
        };
        Ok((ticket, run))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(targets = ?targets)))]
    fn start(
        &self,
        targets: Vec<String>,
        extra: Config,
        options: RunOptions,
    ) -> BoxFuture<'static, EngineResult<RunOutputs>> {
        let prepared = self.prepare(&targets, extra, options);
        async move {
            let (_ticket, run) = prepared?;
            run.execute(targets).await.map(RunOutputs::new)
        }
        .boxed()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.names())
            .field("settings", &self.settings())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
