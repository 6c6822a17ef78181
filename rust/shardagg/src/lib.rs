//! Adjacency matrix aggregation: per-shard evaluation and distributed reduction.
//!
//! A [`FilterSet`](filter::FilterSet) of `N` named predicates induces a fixed universe
//! of `N + C(N, 2)` buckets: one per filter and one per unordered filter pair. Each
//! shard evaluates the filters over its documents and produces an
//! [`InternalAdjacencyMatrix`](matrix::InternalAdjacencyMatrix) covering the whole
//! universe. Partial results from any number of shards are then combined by the
//! [`ReductionEngine`](reduce::ReductionEngine), in one pass or in several, with the
//! same outcome.

pub mod aggregation;
pub mod codec;
pub mod collect;
pub mod config;
pub mod evaluator;
pub mod filter;
pub mod key;
pub mod matrix;
pub mod reduce;
pub mod render;
pub mod search;

pub use aggregation::{InternalAggregation, InternalAggregations};
pub use evaluator::{AdjacencyMatrixAggregation, ShardEvaluator};
pub use filter::{Filter, FilterSet};
pub use matrix::{Bucket, InternalAdjacencyMatrix};
pub use reduce::{Reduce, ReduceContext, ReductionEngine};
pub use search::{AggregationSearch, SearchOutcome, ShardId, ShardRequest};

#[cfg(test)]
mod tests;
