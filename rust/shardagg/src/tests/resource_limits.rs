use std::{sync::Arc, time::Duration};

use shardagg_budget_tracker::Budget;
use shardagg_common::error::ErrorKind;
use shardagg_testkit::{data_gen, doc::TagDoc};
use shardagg_workflow::cancel::CancellationToken;

use super::fixtures::{evaluate, matrix_aggregation, tag_filters};
use crate::{
    collect::{AggregatorFactories, AggregatorFactory},
    config::ReduceConfig,
    evaluator::{AdjacencyMatrixAggregation, ShardEvaluator},
    matrix::InternalAdjacencyMatrix,
    reduce::{Reduce, ReduceContext, ReductionEngine},
    search::{AggregationSearch, ShardId, ShardRequest},
};

fn three_filter_search(config: ReduceConfig) -> AggregationSearch<TagDoc> {
    let factories = AggregatorFactories::new(vec![
        Arc::new(matrix_aggregation(&["a", "b", "c"])) as Arc<dyn AggregatorFactory<TagDoc>>
    ])
    .unwrap();
    AggregationSearch::new(
        ShardEvaluator::new(factories, 4).unwrap(),
        ReductionEngine::new(config).unwrap(),
    )
}

fn two_shards() -> Vec<ShardRequest<TagDoc>> {
    vec![
        ShardRequest::from_docs(ShardId(0), vec![TagDoc::new(1, &["a", "c"])]),
        ShardRequest::from_docs(ShardId(1), vec![TagDoc::new(2, &["b"])]),
    ]
}

#[test]
fn test_too_many_buckets_aborts_request() {
    let search = three_filter_search(ReduceConfig::default().with_max_buckets(5));
    let err = search.run(two_shards(), &CancellationToken::new()).unwrap_err();
    assert!(!err.is_shard_local());
    match err.kind() {
        ErrorKind::TooManyBuckets { limit, requested } => {
            assert_eq!(*limit, 5);
            assert_eq!(*requested, 6);
        }
        other => panic!("unexpected error: {other}"),
    }

    let search = three_filter_search(ReduceConfig::default().with_max_buckets(6));
    assert!(search.run(two_shards(), &CancellationToken::new()).is_ok());
}

#[test]
fn test_budget_counts_nested_buckets() {
    let inner = AdjacencyMatrixAggregation::new("inner", tag_filters(&["x", "y"])).unwrap();
    let subs = AggregatorFactories::new(vec![Arc::new(inner) as Arc<dyn AggregatorFactory<TagDoc>>])
        .unwrap();
    let outer = matrix_aggregation(&["a", "b"]).with_sub_aggregations(subs);
    let shard = evaluate(&outer, &[TagDoc::new(1, &["a", "b", "x"])]);

    let budget = Budget::new(u64::MAX);
    let ctx = ReduceContext::new(budget.clone(), CancellationToken::new());
    InternalAdjacencyMatrix::reduce(vec![shard.clone(), shard], &ctx).unwrap();
    // 3 outer buckets, each holding an inner matrix of 3 buckets.
    assert_eq!(budget.consumed(), 3 + 3 * 3);
}

#[test]
fn test_budget_is_shared_by_concurrent_stages() {
    let names = data_gen::filter_names(3);
    let aggregation = matrix_aggregation(&names);
    let partials = data_gen::split_into_shards(5, data_gen::random_docs(5, 100, &names, 0.5), 8)
        .iter()
        .map(|docs| evaluate(&aggregation, docs))
        .collect::<Vec<_>>();

    // 4 + 2 intermediate reductions and a final one, 6 buckets each.
    let config = ReduceConfig::default().with_batch_reduce_size(2);
    let engine = ReductionEngine::new(config.clone().with_max_buckets(6 * 7)).unwrap();
    let ctx = engine.context(CancellationToken::new());
    engine.reduce(partials.clone(), &ctx).unwrap();
    assert_eq!(ctx.budget().consumed(), 6 * 7);

    let engine = ReductionEngine::new(config.with_max_buckets(6 * 7 - 1)).unwrap();
    let err = engine
        .reduce(partials, &engine.context(CancellationToken::new()))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TooManyBuckets { .. }));
}

#[test]
fn test_expired_deadline_cancels_search() {
    let search = three_filter_search(ReduceConfig::default());
    let token = CancellationToken::with_timeout(Duration::ZERO);
    let err = search.run(two_shards(), &token).unwrap_err();
    assert!(err.is_canceled());
    assert!(matches!(err.kind(), ErrorKind::Canceled { .. }));
}

#[test]
fn test_cancel_during_reduce() {
    let universe_docs = [TagDoc::new(1, &["a"])];
    let aggregation = matrix_aggregation(&["a", "b"]);
    let partials = (0..10)
        .map(|_| evaluate(&aggregation, &universe_docs))
        .collect::<Vec<_>>();
    let token = CancellationToken::new();
    let engine = ReductionEngine::new(ReduceConfig::default().with_batch_reduce_size(3)).unwrap();
    let ctx = engine.context(token.clone());
    token.cancel();
    assert!(engine.reduce(partials, &ctx).unwrap_err().is_canceled());
}
