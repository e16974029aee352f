//! Parallelism tests
//!
//! The per-run concurrency cap and concurrent execution of independent services.
