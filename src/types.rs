//! Core type definitions shared across the engine.
//!
//! Service outputs are type-erased and `Arc`-wrapped so a single value can be handed to any
//! number of dependents without cloning the underlying data. Typed access happens only at the
//! edges, through [`Resolved::get`] and [`RunOutputs::get`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Run configuration handed, read-only, to every producer of a run.
pub type Config = serde_json::Value;

/// Type-erased service output.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wrap any value as a service output.
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// Opaque identifier of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Named values resolved so far, keyed by service name.
///
/// Producers receive their dependencies through this type; the map only ever holds the
/// services the producer declared.
#[derive(Clone, Default)]
pub struct Resolved {
    values: HashMap<String, Value>,
}

impl Resolved {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Typed access to a resolved value.
    ///
    /// Returns `None` if the name is absent or holds a value of another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Typed access that reports why a value is unavailable.
    pub fn try_get<T: Any + Send + Sync>(&self, name: &str) -> EngineResult<&T> {
        let raw = self
            .values
            .get(name)
            .ok_or_else(|| EngineError::MissingDependency {
                name: name.to_string(),
            })?;
        raw.downcast_ref::<T>().ok_or(EngineError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.values.keys().collect();
        names.sort();
        f.debug_struct("Resolved").field("names", &names).finish()
    }
}

/// Outputs of a multi-target run, one entry per requested name.
#[derive(Debug)]
pub struct RunOutputs {
    values: HashMap<String, Value>,
}

impl RunOutputs {
    pub(crate) fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Retrieve a target's output by cloning it out of its `Arc`.
    ///
    /// # Errors
    ///
    /// `MissingDependency` if `name` was not a target of the run, `TypeMismatch` if the value
    /// is not a `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, name: &str) -> EngineResult<T> {
        let raw = self
            .values
            .get(name)
            .ok_or_else(|| EngineError::MissingDependency {
                name: name.to_string(),
            })?;
        downcast_cloned(name, raw)
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

pub(crate) fn downcast_cloned<T: Any + Send + Sync + Clone>(
    name: &str,
    raw: &Value,
) -> EngineResult<T> {
    raw.downcast_ref::<T>()
        .cloned()
        .ok_or(EngineError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

/// Layer `extra` over `base`.
///
/// Object keys in `extra` override the same keys in `base`; a null `extra` keeps `base`; any
/// other `extra` replaces `base` entirely.
pub fn merge_config(base: &Config, extra: Config) -> Config {
    match (base, extra) {
        (_, Config::Null) => base.clone(),
        (Config::Object(base_map), Config::Object(extra_map)) => {
            let mut merged = base_map.clone();
            merged.extend(extra_map);
            Config::Object(merged)
        }
        (_, extra) => extra,
    }
}
