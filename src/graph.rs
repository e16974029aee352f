//! Dependency graph solver.
//!
//! Produces a dependency-respecting execution order for a start node by walking an
//! [`AdjacencyOracle`] depth-first with an explicit stack. Every node's adjacency is queried at
//! most once per resolution; the answers are kept in the returned [`Plan`] so the scheduler
//! never re-asks the oracle during a run.

use std::collections::{HashMap, HashSet};
use std::future::Future;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult};

/// What an oracle knows about one node.
#[derive(Debug, Clone)]
pub enum Adjacency {
    /// The node exists and depends on these nodes, in this order
    Dependencies(Vec<String>),
    /// No node with this name exists
    Missing,
    /// Looking the node up failed; resolution is aborted with this error
    Failed(EngineError),
}

/// Maps a node name to its dependency list.
///
/// Implementations may be synchronous (return [`std::future::ready`]) or perform asynchronous
/// lookups. The solver memoizes answers, so an oracle is never asked about the same node twice
/// within one resolution.
pub trait AdjacencyOracle {
    fn adjacency(&self, name: &str) -> impl Future<Output = Adjacency> + Send;
}

/// Adapts a synchronous closure into an [`AdjacencyOracle`].
pub struct FnOracle<F>(pub F);

impl<F> AdjacencyOracle for FnOracle<F>
where
    F: Fn(&str) -> Adjacency + Sync,
{
    fn adjacency(&self, name: &str) -> impl Future<Output = Adjacency> + Send {
        std::future::ready((self.0)(name))
    }
}

/// A resolved, linearized dependency graph.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
}

impl Plan {
    /// Nodes in execution order; the start node is last.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn into_order(self) -> Vec<String> {
        self.order
    }

    /// Dependencies of `name` as reported by the oracle during resolution.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Resolve the execution order rooted at `start`.
///
/// Dependencies are pushed in the order the oracle returns them, so the output is stable for
/// a fixed oracle.
///
/// # Errors
///
/// - `MissingDependency` naming the first node the oracle has no entry for
/// - `CircularDependency` naming the node that was reached again before it finished
/// - any error the oracle reports through [`Adjacency::Failed`]
pub async fn resolve<O: AdjacencyOracle>(oracle: &O, start: &str) -> EngineResult<Plan> {
    #[cfg(feature = "tracing")]
    debug!(start, "resolving dependency graph");

    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![start.to_string()];
    visited.insert(start.to_string());

    while let Some(top) = stack.last().cloned() {
        if !dependencies.contains_key(&top) {
            match oracle.adjacency(&top).await {
                Adjacency::Dependencies(deps) => {
                    dependencies.insert(top.clone(), deps);
                }
                Adjacency::Missing => {
                    return Err(EngineError::MissingDependency { name: top });
                }
                Adjacency::Failed(err) => return Err(err),
            }
        }

        let mut descended = false;
        for dep in &dependencies[&top] {
            if !visited.contains(dep) {
                #[cfg(feature = "tracing")]
                trace!(node = %top, dependency = %dep, "descending");

                visited.insert(dep.clone());
                stack.push(dep.clone());
                descended = true;
                break;
            }
            if !finished.contains(dep) {
                return Err(EngineError::CircularDependency { name: dep.clone() });
            }
        }

        if !descended {
            stack.pop();
            finished.insert(top.clone());
            order.push(top);
        }
    }

    #[cfg(feature = "tracing")]
    debug!(start, nodes = order.len(), "dependency graph resolved");

    Ok(Plan {
        order,
        dependencies,
    })
}
