//! Execution tests
//!
//! End-to-end runs through the registry: ordering, value flow and batches.

mod multi_target;
mod ordering;
