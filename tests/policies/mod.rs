//! Execution policy tests
//!
//! Retry and timeout behavior observed through full runs.
