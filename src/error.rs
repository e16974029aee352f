//! Error types for graph resolution and service execution.
//!
//! This module defines the failures a run can end with. Every failure names the unit it
//! originated from (when there is one) so callers can tell which service broke the run.

use std::sync::Arc;

/// Boxed error returned by service producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while resolving the dependency graph or executing services
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// A service referenced a dependency that is not registered
    MissingDependency { name: String },
    /// The dependency graph contains a cycle through the named service
    CircularDependency { name: String },
    /// A service delivered a second result within one run
    DuplicateCompletion { name: String },
    /// A producer did not finish before its deadline
    TimeoutExceeded { unit: String, ms: u64 },
    /// The registry is shutting down and refuses new runs
    ShuttingDown,
    /// A producer reported a failure
    ProducerFailure { unit: String, cause: Arc<BoxError> },
    /// A producer panicked
    ProducerPanicked { unit: String, message: String },
    /// A callback-style producer dropped its completion handle without completing
    CompletionDropped { unit: String },
    /// A resolved value was requested as the wrong type
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    /// A service name is empty or reserved
    InvalidServiceName { name: String },
    /// A timeout or retry delay was reached outside of a Tokio runtime
    RuntimeUnavailable { unit: String },
}

impl EngineError {
    /// Wrap a producer error, attributing it to `unit`.
    pub fn producer(unit: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        EngineError::ProducerFailure {
            unit: unit.into(),
            cause: Arc::new(cause.into()),
        }
    }

    /// The service this failure originated from, if any.
    pub fn unit(&self) -> Option<&str> {
        match self {
            EngineError::MissingDependency { name }
            | EngineError::CircularDependency { name }
            | EngineError::DuplicateCompletion { name }
            | EngineError::TypeMismatch { name, .. }
            | EngineError::InvalidServiceName { name } => Some(name),
            EngineError::TimeoutExceeded { unit, .. }
            | EngineError::ProducerFailure { unit, .. }
            | EngineError::ProducerPanicked { unit, .. }
            | EngineError::CompletionDropped { unit }
            | EngineError::RuntimeUnavailable { unit } => Some(unit),
            EngineError::ShuttingDown => None,
        }
    }

    /// Whether this is the "shutting down" rejection.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, EngineError::ShuttingDown)
    }

    /// Whether the failure came out of a producer invocation.
    ///
    /// These are the failures retry and error policies may absorb. Graph errors and
    /// duplicate completions are never recoverable.
    pub fn is_producer_failure(&self) -> bool {
        matches!(
            self,
            EngineError::ProducerFailure { .. }
                | EngineError::TimeoutExceeded { .. }
                | EngineError::ProducerPanicked { .. }
                | EngineError::CompletionDropped { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingDependency { name } => {
                write!(f, "Missing dependency: no service named '{}' is registered", name)
            }
            EngineError::CircularDependency { name } => {
                write!(
                    f,
                    "Circular dependency detected at '{}'\n\
                     \n\
                     The service was reached again before its own dependencies finished resolving.",
                    name
                )
            }
            EngineError::DuplicateCompletion { name } => {
                write!(
                    f,
                    "Service '{}' completed more than once in a single run\n\
                     \n\
                     A producer must deliver exactly one result. The run is aborted.",
                    name
                )
            }
            EngineError::TimeoutExceeded { unit, ms } => {
                write!(f, "Service '{}' timed out after {}ms", unit, ms)
            }
            EngineError::ShuttingDown => {
                write!(f, "Registry is shutting down; no new runs are accepted")
            }
            EngineError::ProducerFailure { unit, cause } => {
                write!(f, "Service '{}' failed: {}", unit, cause)
            }
            EngineError::ProducerPanicked { unit, message } => {
                write!(f, "Service '{}' panicked during execution: {}", unit, message)
            }
            EngineError::CompletionDropped { unit } => {
                write!(
                    f,
                    "Service '{}' dropped its completion handle without delivering a result",
                    unit
                )
            }
            EngineError::TypeMismatch { name, expected } => {
                write!(
                    f,
                    "Value of '{}' is not of the requested type {}",
                    name, expected
                )
            }
            EngineError::InvalidServiceName { name } => {
                write!(f, "Invalid service name '{}'", name.escape_debug())
            }
            EngineError::RuntimeUnavailable { unit } => {
                write!(
                    f,
                    "Service '{}' needs a Tokio runtime for its timeout or retry delay\n\
                     \n\
                     Await the run from inside a Tokio runtime, or drop those policies.",
                    unit
                )
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::ProducerFailure { cause, .. } => Some(&***cause),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
