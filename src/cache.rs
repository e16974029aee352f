//! Per-service result cache.
//!
//! Each service owns at most one [`Cache`]. Entries are keyed by a string derived from the run
//! configuration, written once per key (first write wins) and evicted by age and by count,
//! oldest insertion first. Eviction is opportunistic: it runs on every lookup and every store.
//!
//! The cache is shared by every run that invokes its service, so all state sits behind a
//! single `parking_lot::Mutex`; no lock is held across an await point.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::types::{Config, Value};

/// How a cache key is derived from the run configuration.
#[derive(Clone)]
pub enum CacheKey {
    /// Every configuration maps to the same entry
    Constant,
    /// The value of one top-level config field
    Field(String),
    /// The value found by walking a path of object keys (or array indices) into the config
    Path(Vec<String>),
    /// An arbitrary deterministic function of the config
    Function(Arc<dyn Fn(&Config) -> String + Send + Sync>),
}

impl CacheKey {
    pub fn field(name: impl Into<String>) -> Self {
        CacheKey::Field(name.into())
    }

    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheKey::Path(segments.into_iter().map(Into::into).collect())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Config) -> String + Send + Sync + 'static,
    {
        CacheKey::Function(Arc::new(f))
    }

    /// Derive the key for `config`.
    ///
    /// Strings are used as-is, numbers and booleans by their display form, and anything else
    /// (objects, arrays, null) by its serialized JSON form. `serde_json` keeps object keys
    /// sorted, so configs that are equal by value always collide.
    pub fn derive(&self, config: &Config) -> String {
        match self {
            CacheKey::Constant => String::new(),
            CacheKey::Field(name) => key_string(config.get(name.as_str())),
            CacheKey::Path(segments) => {
                let mut node = Some(config);
                for segment in segments {
                    node = node.and_then(|n| match n {
                        Config::Array(items) => {
                            segment.parse::<usize>().ok().and_then(|i| items.get(i))
                        }
                        _ => n.get(segment.as_str()),
                    });
                }
                key_string(node)
            }
            CacheKey::Function(f) => f(config),
        }
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Constant => write!(f, "Constant"),
            CacheKey::Field(name) => f.debug_tuple("Field").field(name).finish(),
            CacheKey::Path(segments) => f.debug_tuple("Path").field(segments).finish(),
            CacheKey::Function(_) => write!(f, "Function(..)"),
        }
    }
}

fn key_string(node: Option<&Config>) -> String {
    match node {
        Some(Config::String(s)) => s.clone(),
        Some(Config::Number(n)) => n.to_string(),
        Some(Config::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
        None => Config::Null.to_string(),
    }
}

/// Cache configuration for one service.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub key: CacheKey,
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(CacheKey::Constant)
    }
}

impl CachePolicy {
    /// Unbounded policy using `key`.
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            max_age: None,
            max_entries: None,
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

/// Result of a cache lookup.
#[derive(Clone)]
pub struct Lookup {
    pub hit: bool,
    pub key: String,
    pub value: Option<Value>,
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("hit", &self.hit)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

struct Entry {
    value: Value,
    inserted_at: Instant,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, Entry>,
    // Keys in insertion order; the front is the oldest entry
    order: VecDeque<String>,
}

impl Entries {
    fn purge(&mut self, policy: &CachePolicy, now: Instant) {
        if let Some(max_age) = policy.max_age {
            while let Some(oldest) = self.order.front() {
                let stale = self
                    .by_key
                    .get(oldest)
                    .map_or(true, |e| now.saturating_duration_since(e.inserted_at) > max_age);
                if !stale {
                    break;
                }
                if let Some(key) = self.order.pop_front() {
                    self.by_key.remove(&key);
                }
            }
        }

        if let Some(max_entries) = policy.max_entries {
            while self.order.len() > max_entries {
                if let Some(key) = self.order.pop_front() {
                    self.by_key.remove(&key);
                }
            }
        }
    }
}

/// Result cache owned by a single service.
///
/// `None` state means the cache is disabled: lookups miss and stores are dropped.
pub struct Cache {
    policy: CachePolicy,
    entries: Mutex<Option<Entries>>,
}

impl Cache {
    /// Create an enabled, empty cache.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(Some(Entries::default())),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn key_for(&self, config: &Config) -> String {
        self.policy.key.derive(config)
    }

    /// Look up the entry for `config`, purging stale and excess entries first.
    pub fn query(&self, config: &Config) -> Lookup {
        self.query_at(config, Instant::now())
    }

    pub(crate) fn query_at(&self, config: &Config, now: Instant) -> Lookup {
        let key = self.key_for(config);
        let mut guard = self.entries.lock();
        let value = guard.as_mut().and_then(|entries| {
            entries.purge(&self.policy, now);
            entries.by_key.get(&key).map(|e| Arc::clone(&e.value))
        });

        #[cfg(feature = "tracing")]
        trace!(key = %key, hit = value.is_some(), "cache lookup");

        Lookup {
            hit: value.is_some(),
            key,
            value,
        }
    }

    /// Store `value` under the key derived from `config`.
    ///
    /// Returns `false` without touching the entry if the key is already present (first write
    /// wins) or the cache is disabled.
    pub fn store(&self, config: &Config, value: Value) -> bool {
        self.store_at(config, value, Instant::now())
    }

    pub(crate) fn store_at(&self, config: &Config, value: Value, now: Instant) -> bool {
        let key = self.key_for(config);
        let mut guard = self.entries.lock();
        let Some(entries) = guard.as_mut() else {
            return false;
        };
        if entries.by_key.contains_key(&key) {
            return false;
        }

        #[cfg(feature = "tracing")]
        trace!(key = %key, "cache store");

        entries.order.push_back(key.clone());
        entries.by_key.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
        entries.purge(&self.policy, now);
        true
    }

    /// The most recently inserted value still held, ignoring the key.
    ///
    /// Stale and excess entries are purged first, as for [`Cache::query`].
    pub fn latest(&self) -> Option<Value> {
        self.latest_at(Instant::now())
    }

    pub(crate) fn latest_at(&self, now: Instant) -> Option<Value> {
        let mut guard = self.entries.lock();
        let entries = guard.as_mut()?;
        entries.purge(&self.policy, now);
        entries
            .order
            .back()
            .and_then(|key| entries.by_key.get(key))
            .map(|e| Arc::clone(&e.value))
    }

    /// Drop every entry; the cache stays enabled.
    pub fn reset(&self) {
        if let Some(entries) = self.entries.lock().as_mut() {
            *entries = Entries::default();
        }
    }

    /// Drop every entry and stop caching until [`Cache::enable`].
    pub fn disable(&self) {
        *self.entries.lock() = None;
    }

    /// Re-enable a disabled cache, starting empty. No-op if already enabled.
    pub fn enable(&self) {
        let mut guard = self.entries.lock();
        if guard.is_none() {
            *guard = Some(Entries::default());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, |e| e.order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("policy", &self.policy)
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .finish()
    }
}
