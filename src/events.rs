//! Lifecycle notifications.
//!
//! A registry may carry one [`Logger`]: a plain callback invoked at fixed points of a service's
//! life within a run. It is a notification sink only; nothing it returns is consumed.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::RunId;

/// Point in a run at which an event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A producer invocation is about to start
    Start,
    /// A service resolved to a value
    Success,
    /// A service failed, or an error policy absorbed a failure
    Error,
    /// A service was resolved from its cache
    CacheHit,
    /// A run was refused
    AccessDenied,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::CacheHit => "cache-hit",
            EventKind::AccessDenied => "access-denied",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle notification.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub unit: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: String,
}

/// Callback receiving lifecycle events.
pub type Logger = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Emits events for one run; a no-op when no logger is installed.
#[derive(Clone)]
pub(crate) struct Emitter {
    logger: Option<Logger>,
    run_id: RunId,
}

impl Emitter {
    pub(crate) fn new(logger: Option<Logger>, run_id: RunId) -> Self {
        Self { logger, run_id }
    }

    #[cfg(feature = "tracing")]
    pub(crate) fn run_id(&self) -> RunId {
        self.run_id
    }

    pub(crate) fn emit(&self, unit: &str, kind: EventKind, payload: impl Into<String>) {
        if let Some(logger) = &self.logger {
            logger(&LifecycleEvent {
                unit: unit.to_string(),
                run_id: self.run_id,
                timestamp: Utc::now(),
                kind,
                payload: payload.into(),
            });
        }
    }
}
