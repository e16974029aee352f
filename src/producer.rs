//! Producer normalization.
//!
//! A service's producer can be written in one of three shapes:
//!
//! - a synchronous function returning `Result<T, E>` ([`Producer::from_fn`])
//! - a function returning a future of `Result<T, E>` ([`Producer::from_future`])
//! - a function handed an explicit [`Completion`] to call when done ([`Producer::from_callback`])
//!
//! All three are converted, once, at construction time into the same canonical contract: an
//! invocation yields a boxed future that resolves exactly once to the service value or a
//! failure. Panics raised while calling the function or while polling its future are caught
//! and reported as [`EngineError::ProducerPanicked`], so a misbehaving producer can never take
//! the scheduler down with it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{BoxError, EngineError, EngineResult};
use crate::types::{value, Config, Resolved, Value};

/// Why a raw producer invocation did not yield a value.
pub(crate) enum Failure {
    Error(BoxError),
    Dropped,
    Panicked(String),
}

type RawFuture = BoxFuture<'static, Result<Value, Failure>>;
type RawInvoke = dyn Fn(Arc<Config>, Resolved) -> RawFuture + Send + Sync;

/// A producer in canonical form.
///
/// Cheap to clone; every clone invokes the same underlying function.
#[derive(Clone)]
pub struct Producer {
    invoke: Arc<RawInvoke>,
}

impl Producer {
    /// Normalize a synchronous producer.
    pub fn from_fn<F, T, E>(f: F) -> Self
    where
        F: Fn(&Config, &Resolved) -> Result<T, E> + Send + Sync + 'static,
        T: Any + Send + Sync,
        E: Into<BoxError>,
    {
        Self {
            invoke: Arc::new(move |config: Arc<Config>, deps: Resolved| {
                let out = f(&config, &deps)
                    .map(value)
                    .map_err(|e| Failure::Error(e.into()));
                futures::future::ready(out).boxed()
            }),
        }
    }

    /// Normalize a producer that returns a future.
    pub fn from_future<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(Arc<Config>, Resolved) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Any + Send + Sync,
        E: Into<BoxError>,
    {
        Self {
            invoke: Arc::new(move |config: Arc<Config>, deps: Resolved| {
                f(config, deps)
                    .map(|out| out.map(value).map_err(|e| Failure::Error(e.into())))
                    .boxed()
            }),
        }
    }

    /// Normalize a producer that signals completion through a [`Completion`] handle.
    ///
    /// The handle may be moved anywhere (another thread, a timer callback) and is consumed by
    /// completing it, so a second completion cannot be expressed. Dropping it without
    /// completing fails the invocation with [`EngineError::CompletionDropped`].
    pub fn from_callback<F, T>(f: F) -> Self
    where
        F: Fn(&Config, &Resolved, Completion<T>) + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self {
            invoke: Arc::new(move |config: Arc<Config>, deps: Resolved| {
                let (tx, rx) = oneshot::channel();
                f(&config, &deps, Completion { tx });
                async move {
                    match rx.await {
                        Ok(out) => out.map(value).map_err(Failure::Error),
                        Err(oneshot::Canceled) => Err(Failure::Dropped),
                    }
                }
                .boxed()
            }),
        }
    }

    /// Invoke the producer once on behalf of `unit`.
    pub fn call(
        &self,
        unit: &str,
        config: Arc<Config>,
        deps: Resolved,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        let unit = unit.to_string();
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| (self.invoke)(config, deps)));

        async move {
            let out = match started {
                Ok(fut) => AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(Failure::Panicked(panic_message(payload)))),
                Err(payload) => Err(Failure::Panicked(panic_message(payload))),
            };

            out.map_err(|failure| match failure {
                Failure::Error(cause) => EngineError::ProducerFailure {
                    unit,
                    cause: Arc::new(cause),
                },
                Failure::Dropped => EngineError::CompletionDropped { unit },
                Failure::Panicked(message) => EngineError::ProducerPanicked { unit, message },
            })
        }
        .boxed()
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One-shot completion handle given to callback-style producers.
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, BoxError>>,
}

impl<T> Completion<T> {
    /// Deliver the producer's outcome.
    pub fn complete<E: Into<BoxError>>(self, result: Result<T, E>) {
        // The receiver is gone only if the invocation was abandoned (e.g. timed out)
        let _ = self.tx.send(result.map_err(Into::into));
    }

    pub fn succeed(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, error: impl Into<BoxError>) {
        let _ = self.tx.send(Err(error.into()));
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
