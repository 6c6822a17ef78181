use std::sync::Arc;

use proptest::prelude::*;
use shardagg_testkit::{doc::TagDoc, strategies};

use super::fixtures::{counts, evaluate, matrix_aggregation, tag_filters, value_metrics};
use crate::{
    aggregation::{InternalAggregation, MetricValue},
    collect::{AggregatorFactories, AggregatorFactory},
    evaluator::AdjacencyMatrixAggregation,
    key::{BucketKeyScheme, BucketUniverse},
    matrix::InternalAdjacencyMatrix,
    reduce::{Reduce, ReduceContext},
};

fn expected(pairs: &[(&str, u64)]) -> Vec<(String, u64)> {
    pairs.iter().map(|(k, c)| (k.to_string(), *c)).collect()
}

#[test]
fn test_three_filters_single_document() {
    let aggregation = matrix_aggregation(&["a", "b", "c"]);
    let shard = evaluate(&aggregation, &[TagDoc::new(1, &["a", "c"])]);
    assert_eq!(
        counts(&shard),
        expected(&[("a", 1), ("b", 0), ("c", 1), ("a&b", 0), ("a&c", 1), ("b&c", 0)])
    );

    let reduced =
        InternalAdjacencyMatrix::reduce(vec![shard.clone(), shard], &ReduceContext::unbounded())
            .unwrap();
    assert_eq!(
        counts(&reduced),
        expected(&[("a", 2), ("b", 0), ("c", 2), ("a&b", 0), ("a&c", 2), ("b&c", 0)])
    );
}

#[test]
fn test_document_matching_nothing() {
    let aggregation = matrix_aggregation(&["a", "b"]);
    let shard = evaluate(&aggregation, &[TagDoc::new(1, &["z"]), TagDoc::new(2, &[] as &[&str])]);
    assert_eq!(counts(&shard), expected(&[("a", 0), ("b", 0), ("a&b", 0)]));
}

#[test]
fn test_pair_keys_use_name_order_not_filter_order() {
    let aggregation = matrix_aggregation(&["zulu", "alpha"]);
    let shard = evaluate(&aggregation, &[TagDoc::new(1, &["alpha", "zulu"])]);
    assert_eq!(
        counts(&shard),
        expected(&[("zulu", 1), ("alpha", 1), ("alpha&zulu", 1)])
    );
}

#[test]
fn test_bucket_sub_aggregations_reduce() {
    let aggregation = matrix_aggregation(&["a", "b"]).with_sub_aggregations(value_metrics());
    let first = evaluate(
        &aggregation,
        &[
            TagDoc::new(1, &["a"]).with_value(10.0),
            TagDoc::new(2, &["a", "b"]).with_value(5.0),
        ],
    );
    let second = evaluate(
        &aggregation,
        &[TagDoc::new(3, &["a", "b"]), TagDoc::new(4, &["b"]).with_value(1.0)],
    );
    let reduced =
        InternalAdjacencyMatrix::reduce(vec![first, second], &ReduceContext::unbounded()).unwrap();

    let metric = |key: &str, name: &str| {
        *reduced
            .bucket(key)
            .unwrap()
            .aggregations()
            .metric(name)
            .unwrap()
            .value()
    };
    assert_eq!(metric("a", "total"), MetricValue::Sum(15.0));
    assert_eq!(metric("a", "valued"), MetricValue::ValueCount(2));
    assert_eq!(metric("b", "total"), MetricValue::Sum(6.0));
    assert_eq!(metric("a&b", "total"), MetricValue::Sum(5.0));
    assert_eq!(metric("a&b", "valued"), MetricValue::ValueCount(1));
    assert_eq!(reduced.doc_count("a&b"), 2);
}

#[test]
fn test_nested_adjacency_matrix() {
    let inner = AdjacencyMatrixAggregation::new("inner", tag_filters(&["x", "y"])).unwrap();
    let subs = AggregatorFactories::new(vec![Arc::new(inner) as Arc<dyn AggregatorFactory<TagDoc>>])
        .unwrap();
    let outer = matrix_aggregation(&["a", "b"]).with_sub_aggregations(subs);

    let shard = evaluate(
        &outer,
        &[
            TagDoc::new(1, &["a", "x", "y"]),
            TagDoc::new(2, &["a", "b", "x"]),
        ],
    );
    let reduced =
        InternalAdjacencyMatrix::reduce(vec![shard.clone(), shard], &ReduceContext::unbounded())
            .unwrap();

    let inner_of = |key: &str| match reduced.bucket(key).unwrap().aggregations().get("inner") {
        Some(InternalAggregation::AdjacencyMatrix(m)) => counts(m),
        other => panic!("unexpected sub-aggregation {other:?}"),
    };
    assert_eq!(inner_of("a"), expected(&[("x", 4), ("y", 2), ("x&y", 2)]));
    assert_eq!(inner_of("a&b"), expected(&[("x", 2), ("y", 0), ("x&y", 0)]));
    assert!(reduced.bucket("b").unwrap().doc_count() == 2);
}

proptest! {
    #[test]
    fn prop_universe_is_complete(
        (names, docs) in strategies::filter_names(1, 8)
            .prop_flat_map(|names| (Just(names.clone()), strategies::tag_sets(names, 20)))
    ) {
        let aggregation = matrix_aggregation(&names);
        let docs = docs
            .iter()
            .enumerate()
            .map(|(i, tags)| TagDoc::new(i as u64, tags))
            .collect::<Vec<_>>();
        let shard = evaluate(&aggregation, &docs);

        let n = names.len();
        prop_assert_eq!(shard.buckets().len(), n + n * (n - 1) / 2);
        let universe = BucketUniverse::new(&BucketKeyScheme::default(), &names);
        let keys = shard.buckets().iter().map(|b| b.key().to_string()).collect::<Vec<_>>();
        prop_assert_eq!(keys.as_slice(), universe.keys());
    }

    #[test]
    fn prop_counts_match_brute_force(
        (names, docs) in strategies::filter_names(2, 6)
            .prop_flat_map(|names| (Just(names.clone()), strategies::tag_sets(names, 30)))
    ) {
        let aggregation = matrix_aggregation(&names);
        let docs = docs
            .iter()
            .enumerate()
            .map(|(i, tags)| TagDoc::new(i as u64, tags))
            .collect::<Vec<_>>();
        let shard = evaluate(&aggregation, &docs);
        let scheme = BucketKeyScheme::default();

        for a in &names {
            let want = docs.iter().filter(|d| d.has_tag(a)).count() as u64;
            prop_assert_eq!(shard.doc_count(a), want);
            for b in &names {
                if a < b {
                    let want = docs.iter().filter(|d| d.has_tag(a) && d.has_tag(b)).count() as u64;
                    prop_assert_eq!(shard.doc_count(&scheme.pair_key(a, b)), want);
                }
            }
        }
    }
}
