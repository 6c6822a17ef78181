//! Workflow execution utilities for parallel shard evaluation and reduction.
//!
//! # Key Components
//!
//! - [`data_parallel`] - Order-preserving parallel `map` with automatic
//!   sequential fallback for small inputs
//! - [`cancel`] - Cooperative cancellation with an optional deadline, polled by
//!   long-running loops between units of work

pub mod cancel;
pub mod data_parallel;
