//! Service builder.
//!
//! [`ServiceBuilder`] is returned from [`Registry::service`] and collects a service's dependency
//! declaration and policies. A terminal method (`provides`, `provides_async`,
//! `provides_callback` or `with_producer`) supplies the producer and registers the service,
//! replacing any earlier definition under the same name, and returns the registered name.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::cache::{Cache, CachePolicy};
use crate::error::{BoxError, EngineError, EngineResult};
use crate::pipeline::{Pipeline, RetryPolicy, TimeoutScope};
use crate::producer::{Completion, Producer};
use crate::registry::Registry;
use crate::service::{Dependencies, ErrorPolicy, Service};
use crate::types::{Config, Resolved};

/// Fluent definition of one service.
///
/// # Examples
///
/// ```no_run
/// # use servgraph::{CachePolicy, Registry, RetryPolicy};
/// # use std::time::Duration;
/// # async {
/// let registry = Registry::new();
///
/// registry
///     .service("base")
///     .provides(|_, _| Ok::<_, String>(2_i32))
///     .unwrap();
///
/// registry
///     .service("double")
///     .depends_on(["base"])
///     .cache(CachePolicy::default())
///     .retry(RetryPolicy::new().attempts(3))
///     .timeout(Duration::from_secs(1))
///     .provides(|_, deps| Ok::<_, String>(deps.get::<i32>("base").copied().unwrap_or(0) * 2))
///     .unwrap();
///
/// let value: i32 = registry.run("double", serde_json::Value::Null).await.unwrap();
/// assert_eq!(value, 4);
/// # };
/// ```
#[must_use = "a service is only registered once a producer is supplied"]
pub struct ServiceBuilder<'a> {
    registry: &'a Registry,
    name: String,
    dependencies: Dependencies,
    cache: Option<CachePolicy>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
    timeout_scope: Option<TimeoutScope>,
    on_error: ErrorPolicy,
}

impl<'a> ServiceBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, name: String) -> Self {
        Self {
            registry,
            name,
            dependencies: Dependencies::default(),
            cache: None,
            retry: None,
            timeout: None,
            timeout_scope: None,
            on_error: ErrorPolicy::Propagate,
        }
    }

    /// Declare a fixed, ordered list of dependencies.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Dependencies::Static(names.into_iter().map(Into::into).collect());
        self
    }

    /// Compute dependencies from the run configuration.
    ///
    /// `f` may be called several times per run and must return the same names for the same
    /// configuration.
    pub fn depends_on_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Config) -> Vec<String> + Send + Sync + 'static,
    {
        self.dependencies = Dependencies::Dynamic(Arc::new(f));
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Fail the service if it takes longer than `limit`. `Duration::MAX` disables the deadline;
    /// a zero duration expires immediately.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Override the registry's default timeout scope for this service.
    pub fn timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.timeout_scope = Some(scope);
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Register a synchronous producer.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidServiceName`] for an empty name.
    pub fn provides<F, T, E>(self, f: F) -> EngineResult<String>
    where
        F: Fn(&Config, &Resolved) -> Result<T, E> + Send + Sync + 'static,
        T: Any + Send + Sync,
        E: Into<BoxError>,
    {
        self.with_producer(Producer::from_fn(f))
    }

    /// Register a producer returning a future.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidServiceName`] for an empty name.
    pub fn provides_async<F, Fut, T, E>(self, f: F) -> EngineResult<String>
    where
        F: Fn(Arc<Config>, Resolved) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Any + Send + Sync,
        E: Into<BoxError>,
    {
        self.with_producer(Producer::from_future(f))
    }

    /// Register a producer that completes through a [`Completion`] handle.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidServiceName`] for an empty name.
    pub fn provides_callback<F, T>(self, f: F) -> EngineResult<String>
    where
        F: Fn(&Config, &Resolved, Completion<T>) + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        self.with_producer(Producer::from_callback(f))
    }

    /// Register an already normalized producer.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidServiceName`] for an empty name.
    pub fn with_producer(self, producer: Producer) -> EngineResult<String> {
        if self.name.is_empty() {
            return Err(EngineError::InvalidServiceName { name: self.name });
        }

        let scope = self
            .timeout_scope
            .unwrap_or_else(|| self.registry.settings().timeout_scope);
        let pipeline = Pipeline::build(producer, self.retry, self.timeout, scope);

        #[cfg(feature = "tracing")]
        debug!(
            service = %self.name,
            dependencies = ?self.dependencies,
            stages = pipeline.stages().len(),
            cached = self.cache.is_some(),
            "service defined"
        );

        let service = Service::new(
            self.name,
            self.dependencies,
            self.cache.map(Cache::new),
            pipeline,
            self.on_error,
        );
        let name = service.name().to_string();
        self.registry.insert(service);
        Ok(name)
    }
}

impl std::fmt::Debug for ServiceBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("on_error", &self.on_error)
            .finish_non_exhaustive()
    }
}
