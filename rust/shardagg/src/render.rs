//! JSON rendering of results for response formatting.

use serde_json::{Map, Value, json};

use crate::{
    aggregation::{InternalAggregation, InternalAggregations, InternalMetric},
    matrix::InternalAdjacencyMatrix,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Leave out buckets with a zero doc count.
    pub skip_empty_buckets: bool,
}

pub fn to_json(aggregations: &InternalAggregations) -> Value {
    to_json_with(aggregations, &RenderOptions::default())
}

pub fn to_json_with(aggregations: &InternalAggregations, options: &RenderOptions) -> Value {
    Value::Object(render_container(aggregations, options))
}

pub fn matrix_to_json(matrix: &InternalAdjacencyMatrix, options: &RenderOptions) -> Value {
    let mut body = Map::new();
    if let Some(metadata) = matrix.metadata() {
        body.insert("meta".to_string(), Value::Object(metadata.clone()));
    }
    let buckets = matrix
        .buckets()
        .iter()
        .filter(|bucket| !options.skip_empty_buckets || bucket.doc_count() > 0)
        .map(|bucket| {
            let mut entry = Map::new();
            entry.insert("key".to_string(), json!(bucket.key()));
            entry.insert("doc_count".to_string(), json!(bucket.doc_count()));
            entry.extend(render_container(bucket.aggregations(), options));
            Value::Object(entry)
        })
        .collect();
    body.insert("buckets".to_string(), Value::Array(buckets));
    Value::Object(body)
}

fn render_container(aggregations: &InternalAggregations, options: &RenderOptions) -> Map<String, Value> {
    aggregations
        .iter()
        .map(|aggregation| {
            let value = match aggregation {
                InternalAggregation::AdjacencyMatrix(matrix) => matrix_to_json(matrix, options),
                InternalAggregation::Metric(metric) => metric_to_json(metric),
            };
            (aggregation.name().to_string(), value)
        })
        .collect()
}

fn metric_to_json(metric: &InternalMetric) -> Value {
    json!({ "value": metric.value().as_f64() })
}
