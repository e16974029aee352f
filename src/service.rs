//! Services: named units of work.
//!
//! A [`Service`] couples a decorated producer ([`Pipeline`]) with its dependency declaration,
//! its optional [`Cache`] and its [`ErrorPolicy`]. Services are immutable once registered and
//! are shared with runs through `Arc`, so redefining a name never affects a run that already
//! captured the previous definition.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::cache::Cache;
use crate::error::{EngineError, EngineResult};
use crate::events::{Emitter, EventKind};
use crate::pipeline::Pipeline;
use crate::types::{Config, Resolved, Value};

type DependencyFn = Arc<dyn Fn(&Config) -> Vec<String> + Send + Sync>;
type RecoveryFn = Arc<dyn Fn(&EngineError, &Config) -> Value + Send + Sync>;

/// A service's declared dependencies.
#[derive(Clone)]
pub enum Dependencies {
    /// A fixed, ordered list of names
    Static(Vec<String>),
    /// Names computed from the run configuration; must be free of side effects
    Dynamic(DependencyFn),
}

impl Default for Dependencies {
    fn default() -> Self {
        Dependencies::Static(Vec::new())
    }
}

impl Dependencies {
    pub fn resolve(&self, config: &Config) -> Vec<String> {
        match self {
            Dependencies::Static(names) => names.clone(),
            Dependencies::Dynamic(f) => f(config),
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dependencies::Static(names) => f.debug_tuple("Static").field(names).finish(),
            Dependencies::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

/// What happens when a producer fails after its retries are exhausted.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Fail the service, and with it the run
    #[default]
    Propagate,
    /// Resolve to this value instead
    Fixed(Value),
    /// Resolve to a value computed from the failure and the run configuration
    Computed(RecoveryFn),
    /// Resolve to the most recently cached value; propagate if there is none
    UseLastCached,
}

impl ErrorPolicy {
    pub fn fixed<T: std::any::Any + Send + Sync>(value: T) -> Self {
        ErrorPolicy::Fixed(Arc::new(value))
    }

    pub fn computed<F, T>(f: F) -> Self
    where
        F: Fn(&EngineError, &Config) -> T + Send + Sync + 'static,
        T: std::any::Any + Send + Sync,
    {
        ErrorPolicy::Computed(Arc::new(move |err: &EngineError, config: &Config| {
            Arc::new(f(err, config)) as Value
        }))
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPolicy::Propagate => write!(f, "Propagate"),
            ErrorPolicy::Fixed(_) => write!(f, "Fixed(..)"),
            ErrorPolicy::Computed(_) => write!(f, "Computed(..)"),
            ErrorPolicy::UseLastCached => write!(f, "UseLastCached"),
        }
    }
}

/// Where a service stands within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceState {
    NotStarted,
    Running,
    Resolved,
    /// Resolved from the cache without invoking the producer
    Cached,
    Failed,
}

impl ServiceState {
    pub(crate) fn is_settled(&self) -> bool {
        matches!(
            self,
            ServiceState::Resolved | ServiceState::Cached | ServiceState::Failed
        )
    }
}

/// A registered unit of work.
pub struct Service {
    name: String,
    dependencies: Dependencies,
    cache: Option<Cache>,
    pipeline: Arc<Pipeline>,
    on_error: ErrorPolicy,
}

impl Service {
    pub(crate) fn new(
        name: String,
        dependencies: Dependencies,
        cache: Option<Cache>,
        pipeline: Pipeline,
        on_error: ErrorPolicy,
    ) -> Self {
        Self {
            name,
            dependencies,
            cache,
            pipeline: Arc::new(pipeline),
            on_error,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependency names for a run with `config`. Has no side effects.
    pub fn dependencies_for(&self, config: &Config) -> Vec<String> {
        self.dependencies.resolve(config)
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.on_error
    }

    /// Cached value for `config`, if the service caches and holds one.
    pub(crate) fn lookup(&self, config: &Config, emitter: &Emitter) -> Option<Value> {
        let lookup = self.cache.as_ref()?.query(config);
        if lookup.hit {
            #[cfg(feature = "tracing")]
            trace!(service = %self.name, key = %lookup.key, "cache hit");

            emitter.emit(&self.name, EventKind::CacheHit, lookup.key);
        }
        lookup.value
    }

    /// Run the decorated producer, cache a success and apply the error policy to a failure.
    ///
    /// The cache is not consulted; see [`Service::invoke`] for the full contract.
    pub(crate) fn execute(
        self: &Arc<Self>,
        config: Arc<Config>,
        deps: Resolved,
        emitter: Emitter,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        let this = Arc::clone(self);
        async move {
            emitter.emit(&this.name, EventKind::Start, "");

            #[cfg(feature = "tracing")]
            debug!(service = %this.name, run = %emitter.run_id(), "invoking producer");

            match this.pipeline.invoke(&this.name, Arc::clone(&config), deps).await {
                Ok(value) => {
                    if let Some(cache) = &this.cache {
                        cache.store(&config, Arc::clone(&value));
                    }
                    emitter.emit(&this.name, EventKind::Success, "");
                    Ok(value)
                }
                Err(err) => {
                    emitter.emit(&this.name, EventKind::Error, err.to_string());
                    let recovered = this.recover(err, &config);
                    if recovered.is_ok() {
                        #[cfg(feature = "tracing")]
                        debug!(service = %this.name, policy = ?this.on_error, "failure absorbed");

                        emitter.emit(
                            &this.name,
                            EventKind::Error,
                            format!("recovered via {:?}", this.on_error),
                        );
                    }
                    recovered
                }
            }
        }
        .boxed()
    }

    fn recover(&self, err: EngineError, config: &Config) -> EngineResult<Value> {
        if !err.is_producer_failure() {
            return Err(err);
        }
        match &self.on_error {
            ErrorPolicy::Propagate => Err(err),
            ErrorPolicy::Fixed(value) => Ok(Arc::clone(value)),
            ErrorPolicy::Computed(f) => Ok(f(&err, config)),
            ErrorPolicy::UseLastCached => self.cache.as_ref().and_then(Cache::latest).ok_or(err),
        }
    }

    /// Resolve this service once: from the cache if possible, otherwise through the producer.
    ///
    /// A cache hit skips the producer entirely but is still delivered on a later poll, never
    /// inline, so callers always observe an asynchronous completion.
    pub(crate) fn invoke(
        self: &Arc<Self>,
        config: Arc<Config>,
        deps: Resolved,
        emitter: Emitter,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        match self.lookup(&config, &emitter) {
            Some(value) => async move {
                next_tick().await;
                Ok(value)
            }
            .boxed(),
            None => self.execute(config, deps, emitter),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("cache", &self.cache)
            .field("pipeline", &self.pipeline)
            .field("on_error", &self.on_error)
            .finish()
    }
}

/// Completes on the second poll, handing control back to the executor once.
pub(crate) fn next_tick() -> NextTick {
    NextTick { yielded: false }
}

pub(crate) struct NextTick {
    yielded: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
