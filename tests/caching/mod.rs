//! Caching tests
//!
//! Result caching across runs and copy-on-run service snapshots.

mod across_runs;
