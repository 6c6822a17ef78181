use std::sync::Arc;

use shardagg_testkit::doc::TagDoc;
use shardagg_workflow::cancel::CancellationToken;

use crate::{
    aggregation::InternalAggregations,
    collect::{AggregatorFactories, AggregatorFactory, MetricAggregatorFactory},
    evaluator::AdjacencyMatrixAggregation,
    filter::{Filter, FilterSet},
    key::BucketUniverse,
    matrix::{Bucket, InternalAdjacencyMatrix},
};

/// One filter per tag, matching documents that carry the tag.
pub fn tag_filters<S: AsRef<str>>(names: &[S]) -> Arc<FilterSet<TagDoc>> {
    let filters = names
        .iter()
        .map(|name| {
            let tag = name.as_ref().to_string();
            Filter::from_fn(name.as_ref(), move |doc: &TagDoc| doc.has_tag(&tag))
        })
        .collect();
    Arc::new(FilterSet::new(filters).unwrap())
}

pub fn matrix_aggregation<S: AsRef<str>>(names: &[S]) -> AdjacencyMatrixAggregation<TagDoc> {
    AdjacencyMatrixAggregation::new("interactions", tag_filters(names)).unwrap()
}

/// A `sum` of the document value and a `value_count`, as bucket sub-aggregations.
pub fn value_metrics() -> AggregatorFactories<TagDoc> {
    AggregatorFactories::new(vec![
        Arc::new(MetricAggregatorFactory::sum("total", |d: &TagDoc| d.value))
            as Arc<dyn AggregatorFactory<TagDoc>>,
        Arc::new(MetricAggregatorFactory::value_count("valued", |d: &TagDoc| d.value)),
    ])
    .unwrap()
}

pub fn evaluate(
    aggregation: &AdjacencyMatrixAggregation<TagDoc>,
    docs: &[TagDoc],
) -> InternalAdjacencyMatrix {
    aggregation
        .evaluate_shard(docs.iter().cloned().map(Ok), &CancellationToken::new())
        .unwrap()
}

/// A matrix over `universe` with the given per-slot counts and no sub-aggregations.
pub fn from_counts(universe: &BucketUniverse, counts: &[u64]) -> InternalAdjacencyMatrix {
    assert_eq!(universe.len(), counts.len());
    let buckets = universe
        .keys()
        .iter()
        .zip(counts)
        .map(|(key, &count)| Bucket::new(key.as_str(), count, InternalAggregations::empty()))
        .collect();
    InternalAdjacencyMatrix::new("interactions", buckets, None)
}

pub fn counts(matrix: &InternalAdjacencyMatrix) -> Vec<(String, u64)> {
    matrix
        .buckets()
        .iter()
        .map(|b| (b.key().to_string(), b.doc_count()))
        .collect()
}
