//! Execution decorators for a service's producer.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s wrapped around a canonical [`Producer`],
//! built once when a service is defined. Stages are listed outermost first; invoking the
//! pipeline enters the first stage, which decides how (and how often) to enter the next one,
//! until the innermost stage calls the producer.
//!
//! With both a retry and a timeout policy the default layout is
//! `[Timeout, Retry] -> producer`, so the deadline bounds the whole retry sequence.
//! [`TimeoutScope::PerAttempt`] swaps the two stages so each attempt gets its own deadline.
//!
//! Timeouts and retry delays require a Tokio runtime: the timed invocation is spawned so that,
//! when the deadline passes, it can be left to finish on its own while its result is discarded.
//! Reaching either stage outside a runtime fails the service with
//! [`EngineError::RuntimeUnavailable`] instead of panicking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::producer::Producer;
use crate::types::{Config, Resolved, Value};

type RetryPredicate = Arc<dyn Fn(&EngineError) -> bool + Send + Sync>;

/// Re-invoke a failing producer.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries without bound
    pub max_attempts: Option<u32>,
    /// Pause between a failed attempt and the next one
    pub delay: Duration,
    predicate: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            delay: Duration::ZERO,
            predicate: Arc::new(|_| true),
        }
    }
}

impl RetryPolicy {
    /// Retry any failure, without bound and without delay.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Only retry failures matching `predicate`.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EngineError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether a failure on attempt number `attempt` (1-based) should be retried.
    pub fn should_retry(&self, attempt: u32, error: &EngineError) -> bool {
        let attempts_left = self.max_attempts.map_or(true, |max| attempt < max);
        attempts_left && error.is_producer_failure() && (self.predicate)(error)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// What a timeout bounds when a service also retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutScope {
    /// One deadline for the first attempt and every retry
    #[default]
    WholeSequence,
    /// A fresh deadline for each attempt
    PerAttempt,
}

/// One wrapper around the producer.
#[derive(Debug, Clone)]
pub enum Stage {
    Retry(RetryPolicy),
    Timeout(Duration),
}

struct Call {
    unit: String,
    config: Arc<Config>,
    deps: Resolved,
    /// Set when an enclosing deadline expired; no further attempts are started
    abandoned: AtomicBool,
}

impl Call {
    fn new(unit: String, config: Arc<Config>, deps: Resolved) -> Arc<Self> {
        Arc::new(Self {
            unit,
            config,
            deps,
            abandoned: AtomicBool::new(false),
        })
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// Statically composed decorator stack for one service.
pub struct Pipeline {
    stages: Vec<Stage>,
    producer: Producer,
}

impl Pipeline {
    /// Lay out the stages for the given policies.
    ///
    /// An absent deadline adds no timeout stage, nor does `Duration::MAX`. A zero deadline
    /// expires immediately.
    pub fn build(
        producer: Producer,
        retry: Option<RetryPolicy>,
        timeout: Option<Duration>,
        scope: TimeoutScope,
    ) -> Self {
        let timeout = timeout
            .filter(|limit| *limit != Duration::MAX)
            .map(Stage::Timeout);
        let retry = retry.map(Stage::Retry);

        let stages = match scope {
            TimeoutScope::WholeSequence => timeout.into_iter().chain(retry).collect(),
            TimeoutScope::PerAttempt => retry.into_iter().chain(timeout).collect(),
        };

        Self { stages, producer }
    }

    /// Stages, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Invoke the producer through every stage on behalf of `unit`.
    pub fn invoke(
        self: &Arc<Self>,
        unit: &str,
        config: Arc<Config>,
        deps: Resolved,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        self.enter(0, Call::new(unit.to_string(), config, deps))
    }

    fn enter(
        self: &Arc<Self>,
        index: usize,
        call: Arc<Call>,
    ) -> BoxFuture<'static, EngineResult<Value>> {
        let Some(stage) = self.stages.get(index) else {
            return self
                .producer
                .call(&call.unit, Arc::clone(&call.config), call.deps.clone());
        };

        let this = Arc::clone(self);
        match stage.clone() {
            Stage::Retry(policy) => async move {
                if !policy.delay.is_zero() {
                    runtime(&call.unit)?;
                }
                let mut attempt = 1;
                loop {
                    match this.enter(index + 1, Arc::clone(&call)).await {
                        Ok(value) => return Ok(value),
                        Err(err)
                            if policy.should_retry(attempt, &err) && !call.is_abandoned() =>
                        {
                            #[cfg(feature = "tracing")]
                            debug!(unit = %call.unit, attempt, error = %err, "retrying");

                            attempt += 1;
                            if policy.delay.is_zero() {
                                // A producer failing synchronously must not starve the timer
                                tokio::task::yield_now().await;
                            } else {
                                tokio::time::sleep(policy.delay).await;
                            }
                            if call.is_abandoned() {
                                return Err(err);
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            .boxed(),
            Stage::Timeout(limit) => async move {
                let rt = runtime(&call.unit)?;
                let timed = Call::new(
                    call.unit.clone(),
                    Arc::clone(&call.config),
                    call.deps.clone(),
                );
                let mut handle = rt.spawn(this.enter(index + 1, Arc::clone(&timed)));
                match tokio::time::timeout(limit, &mut handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => Err(EngineError::ProducerPanicked {
                        unit: call.unit.clone(),
                        message: join_err.to_string(),
                    }),
                    Err(_elapsed) => {
                        #[cfg(feature = "tracing")]
                        warn!(unit = %call.unit, limit_ms = limit.as_millis() as u64, "timed out");

                        // The running attempt finishes detached; its result goes nowhere
                        timed.abandoned.store(true, Ordering::Release);
                        drop(handle);
                        Err(EngineError::TimeoutExceeded {
                            unit: call.unit.clone(),
                            ms: limit.as_millis() as u64,
                        })
                    }
                }
            }
            .boxed(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

/// Handle to the Tokio runtime driving the current task.
fn runtime(unit: &str) -> EngineResult<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| EngineError::RuntimeUnavailable {
        unit: unit.to_string(),
    })
}
