//! Reduction of partial results.
//!
//! Partial results are combined with [`Reduce::reduce`], which must be associative and
//! commutative in its observable outcome so that any grouping of partials (a single
//! final pass, or several intermediate passes fed into a final one) produces the same
//! answer. [`ReductionEngine`] drives the grouping: once there are more inputs than
//! `batch_reduce_size`, it reduces contiguous batches in parallel and feeds the
//! intermediate results into the next pass.

use shardagg_budget_tracker::Budget;
use shardagg_common::{Result, error::Error, verify_arg};
use shardagg_workflow::{cancel::CancellationToken, data_parallel};

use crate::config::ReduceConfig;

/// A result type that can be combined with others of its kind.
pub trait Reduce: Sized {
    /// Combines a non-empty list of partials into one.
    fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self>;
}

/// Shared state of one reduction tree: the bucket budget and the request's cancellation
/// token.
#[derive(Debug, Clone)]
pub struct ReduceContext {
    budget: Budget,
    cancellation: CancellationToken,
}

impl ReduceContext {
    pub fn new(budget: Budget, cancellation: CancellationToken) -> ReduceContext {
        ReduceContext {
            budget,
            cancellation,
        }
    }

    /// A context with no bucket ceiling that is never canceled.
    pub fn unbounded() -> ReduceContext {
        Self::new(Budget::unlimited(), CancellationToken::new())
    }

    pub fn with_max_buckets(max_buckets: u64, cancellation: CancellationToken) -> ReduceContext {
        Self::new(Budget::new(max_buckets), cancellation)
    }

    /// A context for one concurrently running reduction task.
    ///
    /// The task gets a subordinate budget, so all tasks still share the request total.
    pub fn for_task(&self) -> ReduceContext {
        ReduceContext {
            budget: self.budget.split(),
            cancellation: self.cancellation.clone(),
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.cancellation
            .check()
            .map_err(|canceled| Error::canceled(canceled.to_string()))
    }

    /// Accounts for `count` materialized buckets.
    ///
    /// Fails with `TooManyBuckets` once the running total of the tree would pass the
    /// ceiling.
    pub fn consume_buckets(&self, count: u64) -> Result<()> {
        self.budget
            .charge(count)
            .map_err(|e| Error::too_many_buckets(e.limit, e.requested))
    }
}

/// Reduces large lists of partials in bounded batches.
#[derive(Debug, Clone)]
pub struct ReductionEngine {
    config: ReduceConfig,
}

impl ReductionEngine {
    pub fn new(config: ReduceConfig) -> Result<ReductionEngine> {
        config.validate()?;
        Ok(ReductionEngine { config })
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// A fresh context carrying this engine's bucket ceiling.
    pub fn context(&self, cancellation: CancellationToken) -> ReduceContext {
        ReduceContext::with_max_buckets(self.config.max_buckets, cancellation)
    }

    /// Reduces `items` to a single value.
    ///
    /// While more than `batch_reduce_size` inputs remain, the list is cut into
    /// contiguous batches that are reduced concurrently; the last pass then combines at
    /// most `batch_reduce_size` intermediate results. The outcome matches a single
    /// reduce over all inputs.
    pub fn reduce<T>(&self, items: Vec<T>, ctx: &ReduceContext) -> Result<T>
    where
        T: Reduce + Send,
    {
        verify_arg!(items, !items.is_empty());
        let batch_size = self.config.batch_reduce_size;
        let mut items = items;
        let mut stage = 0;
        while items.len() > batch_size {
            ctx.check_canceled()?;
            stage += 1;
            let input_count = items.len();
            let batches = chunk(items, batch_size);
            log::debug!(
                "reduce stage {stage}: {input_count} partials in {} batches",
                batches.len()
            );
            items = data_parallel::map(self.config.max_parallelism, batches, |batch| {
                T::reduce(batch, &ctx.for_task())
            })
            .collect::<Result<Vec<_>>>()?;
        }
        ctx.check_canceled()?;
        log::debug!("final reduce of {} partials", items.len());
        T::reduce(items, ctx)
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

#[cfg(test)]
mod tests {
    use shardagg_common::error::ErrorKind;

    use super::*;

    /// Sums its inputs and records how many were combined per call.
    #[derive(Debug, PartialEq)]
    struct Total {
        value: u64,
        widest_call: usize,
    }

    impl Reduce for Total {
        fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self> {
            ctx.check_canceled()?;
            ctx.consume_buckets(1)?;
            let widest = items.iter().map(|t| t.widest_call).max().unwrap_or(0);
            Ok(Total {
                widest_call: widest.max(items.len()),
                value: items.iter().map(|t| t.value).sum(),
            })
        }
    }

    fn totals(n: u64) -> Vec<Total> {
        (1..=n)
            .map(|value| Total {
                value,
                widest_call: 0,
            })
            .collect()
    }

    #[test]
    fn test_chunk() {
        let batches = chunk((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert!(chunk(Vec::<u8>::new(), 3).is_empty());
    }

    #[test]
    fn test_single_pass() {
        let engine = ReductionEngine::new(ReduceConfig::default()).unwrap();
        let ctx = ReduceContext::unbounded();
        let total = engine.reduce(totals(10), &ctx).unwrap();
        assert_eq!(total.value, 55);
        assert_eq!(total.widest_call, 10);
        assert_eq!(ctx.budget().consumed(), 1);
    }

    #[test]
    fn test_multi_stage_bounds_batch_width() {
        let config = ReduceConfig::default().with_batch_reduce_size(3);
        let engine = ReductionEngine::new(config).unwrap();
        let ctx = ReduceContext::unbounded();
        let total = engine.reduce(totals(20), &ctx).unwrap();
        assert_eq!(total.value, 210);
        assert!(total.widest_call <= 3);
        // 7 + 3 intermediate calls, then the final one.
        assert_eq!(ctx.budget().consumed(), 11);
    }

    #[test]
    fn test_budget_shared_across_tasks() {
        let config = ReduceConfig::default()
            .with_batch_reduce_size(2)
            .with_max_buckets(3);
        let engine = ReductionEngine::new(config).unwrap();
        let ctx = engine.context(CancellationToken::new());
        let err = engine.reduce(totals(8), &ctx).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TooManyBuckets { limit: 3, .. }));
    }

    #[test]
    fn test_canceled() {
        let engine = ReductionEngine::new(ReduceConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = engine.context(token);
        assert!(engine.reduce(totals(3), &ctx).unwrap_err().is_canceled());
    }

    #[test]
    fn test_rejects_empty_input() {
        let engine = ReductionEngine::new(ReduceConfig::default()).unwrap();
        assert!(engine.reduce(Vec::<Total>::new(), &ReduceContext::unbounded()).is_err());
        assert!(ReductionEngine::new(ReduceConfig::default().with_batch_reduce_size(1)).is_err());
    }
}
