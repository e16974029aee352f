//! Engine settings.

use crate::pipeline::TimeoutScope;

/// Registry-wide execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settings {
    /// Maximum producer invocations in flight per run; `None` is unbounded
    pub parallelism: Option<usize>,
    /// Default timeout scope for services that set both a timeout and a retry policy
    pub timeout_scope: TimeoutScope,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallelism(mut self, limit: usize) -> Self {
        self.parallelism = Some(limit);
        self
    }

    pub fn timeout_scope(mut self, scope: TimeoutScope) -> Self {
        self.timeout_scope = scope;
        self
    }
}

/// Per-run overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Replaces the registry's parallelism cap for this run
    pub parallelism: Option<usize>,
}

impl RunOptions {
    pub fn parallelism(limit: usize) -> Self {
        Self {
            parallelism: Some(limit),
        }
    }
}
