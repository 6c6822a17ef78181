//! Scatter/gather over shards.
//!
//! [`AggregationSearch::run`] evaluates every shard concurrently, sets aside the
//! shards that failed with a shard-local error, and reduces the surviving partials.
//! Any other error aborts the whole request.

use shardagg_common::{Result, error::Error, verify_arg};
use shardagg_workflow::{cancel::CancellationToken, data_parallel};

use crate::{
    aggregation::InternalAggregations, evaluator::ShardEvaluator, reduce::ReductionEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}", self.0)
    }
}

pub type DocStream<D> = Box<dyn Iterator<Item = Result<D>> + Send>;

/// One shard's candidate documents.
pub struct ShardRequest<D> {
    pub shard_id: ShardId,
    pub docs: DocStream<D>,
}

impl<D: Send + 'static> ShardRequest<D> {
    pub fn new(shard_id: ShardId, docs: DocStream<D>) -> ShardRequest<D> {
        ShardRequest { shard_id, docs }
    }

    pub fn from_docs(shard_id: ShardId, docs: Vec<D>) -> ShardRequest<D> {
        Self::new(shard_id, Box::new(docs.into_iter().map(Ok)))
    }
}

#[derive(Debug)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub error: Error,
}

/// Result of a search over several shards.
///
/// `result` covers the successful shards only. It is `None` when every shard failed.
#[derive(Debug)]
pub struct SearchOutcome {
    pub result: Option<InternalAggregations>,
    pub failures: Vec<ShardFailure>,
    pub total_shards: usize,
}

impl SearchOutcome {
    pub fn successful_shards(&self) -> usize {
        self.total_shards - self.failures.len()
    }

    /// `true` when every shard contributed to the result.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.result.is_some()
    }
}

pub struct AggregationSearch<D> {
    evaluator: ShardEvaluator<D>,
    engine: ReductionEngine,
}

impl<D: Send + 'static> AggregationSearch<D> {
    pub fn new(evaluator: ShardEvaluator<D>, engine: ReductionEngine) -> AggregationSearch<D> {
        AggregationSearch { evaluator, engine }
    }

    pub fn engine(&self) -> &ReductionEngine {
        &self.engine
    }

    pub fn run(
        &self,
        shards: Vec<ShardRequest<D>>,
        cancellation: &CancellationToken,
    ) -> Result<SearchOutcome> {
        verify_arg!(shards, !shards.is_empty());
        let total_shards = shards.len();
        let parallelism = self.engine.config().max_parallelism;

        let evaluated = data_parallel::map(parallelism, shards, |shard| {
            let ShardRequest { shard_id, docs } = shard;
            let result = self.evaluator.evaluate(docs, cancellation);
            if result.is_ok() {
                log::debug!("{shard_id}: evaluation complete");
            }
            (shard_id, result)
        });

        let mut partials = Vec::with_capacity(total_shards);
        let mut failures = Vec::new();
        for (shard_id, result) in evaluated {
            match result {
                Ok(partial) => partials.push(partial),
                Err(error) if error.is_shard_local() => {
                    log::warn!("{shard_id} failed: {error}");
                    failures.push(ShardFailure { shard_id, error });
                }
                Err(error) => return Err(error),
            }
        }

        let result = if partials.is_empty() {
            log::warn!("all {total_shards} shards failed");
            None
        } else {
            let ctx = self.engine.context(cancellation.clone());
            Some(self.engine.reduce(partials, &ctx)?)
        };
        Ok(SearchOutcome {
            result,
            failures,
            total_shards,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        collect::{AggregatorFactories, AggregatorFactory},
        config::ReduceConfig,
        evaluator::AdjacencyMatrixAggregation,
        filter::{Filter, FilterSet},
    };

    fn search() -> AggregationSearch<u32> {
        let filters = FilterSet::new(vec![
            Filter::from_fn("odd", |d: &u32| d % 2 == 1),
            Filter::from_fn("big", |d: &u32| *d >= 10),
        ])
        .unwrap();
        let matrix = AdjacencyMatrixAggregation::new("m", Arc::new(filters)).unwrap();
        let factories =
            AggregatorFactories::new(vec![Arc::new(matrix) as Arc<dyn AggregatorFactory<u32>>])
                .unwrap();
        AggregationSearch::new(
            ShardEvaluator::new(factories, 16).unwrap(),
            ReductionEngine::new(ReduceConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_all_shards_succeed() {
        let shards = vec![
            ShardRequest::from_docs(ShardId(0), vec![1, 2, 11]),
            ShardRequest::from_docs(ShardId(1), vec![13, 20]),
        ];
        let outcome = search().run(shards, &CancellationToken::new()).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.successful_shards(), 2);
        let matrix = outcome.result.as_ref().unwrap().matrix("m").unwrap().clone();
        assert_eq!(matrix.doc_count("odd"), 3);
        assert_eq!(matrix.doc_count("big"), 3);
        assert_eq!(matrix.doc_count("big&odd"), 2);
    }

    #[test]
    fn test_every_shard_fails() {
        let broken = || -> DocStream<u32> {
            Box::new(std::iter::once(Err(Error::io(
                "segment",
                std::io::Error::other("gone"),
            ))))
        };
        let shards = vec![
            ShardRequest::new(ShardId(0), broken()),
            ShardRequest::new(ShardId(1), broken()),
        ];
        let outcome = search().run(shards, &CancellationToken::new()).unwrap();
        assert!(outcome.result.is_none());
        assert_eq!(outcome.failures.len(), 2);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_cancellation_aborts_request() {
        let token = CancellationToken::new();
        token.cancel();
        let shards = vec![ShardRequest::from_docs(ShardId(0), vec![1])];
        let err = search().run(shards, &token).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_no_shards() {
        assert!(search().run(vec![], &CancellationToken::new()).is_err());
    }
}
