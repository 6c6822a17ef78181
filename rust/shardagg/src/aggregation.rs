//! Aggregation results exchanged between shards and coordinators.
//!
//! [`InternalAggregation`] is the closed set of result shapes a bucket may nest.
//! Each variant knows how to reduce a group of same-named results of its own kind.

use ahash::AHashMap;
use shardagg_common::{Result, error::Error, verify_arg};

use crate::{
    matrix::InternalAdjacencyMatrix,
    reduce::{Reduce, ReduceContext},
};

/// Free-form metadata attached to an aggregation by the caller. Opaque to the engine.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum InternalAggregation {
    AdjacencyMatrix(InternalAdjacencyMatrix),
    Metric(InternalMetric),
}

impl InternalAggregation {
    pub fn name(&self) -> &str {
        match self {
            InternalAggregation::AdjacencyMatrix(matrix) => matrix.name(),
            InternalAggregation::Metric(metric) => metric.name(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InternalAggregation::AdjacencyMatrix(_) => "adjacency_matrix",
            InternalAggregation::Metric(metric) => metric.value().kind().type_name(),
        }
    }

    pub fn as_matrix(&self) -> Option<&InternalAdjacencyMatrix> {
        match self {
            InternalAggregation::AdjacencyMatrix(matrix) => Some(matrix),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&InternalMetric> {
        match self {
            InternalAggregation::Metric(metric) => Some(metric),
            _ => None,
        }
    }
}

impl From<InternalAdjacencyMatrix> for InternalAggregation {
    fn from(matrix: InternalAdjacencyMatrix) -> Self {
        InternalAggregation::AdjacencyMatrix(matrix)
    }
}

impl From<InternalMetric> for InternalAggregation {
    fn from(metric: InternalMetric) -> Self {
        InternalAggregation::Metric(metric)
    }
}

impl Reduce for InternalAggregation {
    /// Dispatches the whole group to the reduce of the variant found first.
    ///
    /// A group mixing variants (or metric kinds) under one name is rejected.
    fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self> {
        verify_arg!(items, !items.is_empty());
        let type_name = items[0].type_name();
        if let Some(other) = items.iter().find(|agg| agg.type_name() != type_name) {
            return Err(Error::invalid_operation(format!(
                "reduce of '{}': cannot combine {type_name} with {}",
                other.name(),
                other.type_name()
            )));
        }

        if matches!(items[0], InternalAggregation::AdjacencyMatrix(_)) {
            let matrices = items
                .into_iter()
                .filter_map(|agg| match agg {
                    InternalAggregation::AdjacencyMatrix(matrix) => Some(matrix),
                    _ => None,
                })
                .collect();
            InternalAdjacencyMatrix::reduce(matrices, ctx).map(Into::into)
        } else {
            let metrics = items
                .into_iter()
                .filter_map(|agg| match agg {
                    InternalAggregation::Metric(metric) => Some(metric),
                    _ => None,
                })
                .collect();
            InternalMetric::reduce(metrics, ctx).map(Into::into)
        }
    }
}

/// An ordered collection of named aggregation results.
///
/// Names are unique within a collection. Bucket sub-aggregations and the top-level
/// shard output both use this container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalAggregations(Vec<InternalAggregation>);

impl InternalAggregations {
    pub fn empty() -> InternalAggregations {
        InternalAggregations(Vec::new())
    }

    pub fn from_vec(aggregations: Vec<InternalAggregation>) -> Result<InternalAggregations> {
        let mut result = InternalAggregations(Vec::with_capacity(aggregations.len()));
        for agg in aggregations {
            result.push(agg)?;
        }
        Ok(result)
    }

    pub fn push(&mut self, aggregation: InternalAggregation) -> Result<()> {
        if self.get(aggregation.name()).is_some() {
            return Err(Error::invalid_arg(
                "aggregation",
                format!("duplicate aggregation name '{}'", aggregation.name()),
            ));
        }
        self.0.push(aggregation);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&InternalAggregation> {
        self.0.iter().find(|agg| agg.name() == name)
    }

    pub fn matrix(&self, name: &str) -> Option<&InternalAdjacencyMatrix> {
        self.get(name).and_then(InternalAggregation::as_matrix)
    }

    pub fn metric(&self, name: &str) -> Option<&InternalMetric> {
        self.get(name).and_then(InternalAggregation::as_metric)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InternalAggregation> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<InternalAggregation> {
        self.0
    }
}

impl<'a> IntoIterator for &'a InternalAggregations {
    type Item = &'a InternalAggregation;
    type IntoIter = std::slice::Iter<'a, InternalAggregation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Reduce for InternalAggregations {
    /// Groups the entries of all containers by name, in order of first appearance, and
    /// reduces every group exactly once.
    fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self> {
        ctx.check_canceled()?;
        let mut groups: Vec<Vec<InternalAggregation>> = Vec::new();
        let mut slots = AHashMap::<String, usize>::new();
        for container in items {
            for agg in container.0 {
                match slots.get(agg.name()) {
                    Some(&slot) => groups[slot].push(agg),
                    None => {
                        slots.insert(agg.name().to_string(), groups.len());
                        groups.push(vec![agg]);
                    }
                }
            }
        }

        let reduced = groups
            .into_iter()
            .map(|group| InternalAggregation::reduce(group, ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(InternalAggregations(reduced))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Sum,
    Min,
    Max,
    ValueCount,
}

impl MetricKind {
    pub fn type_name(self) -> &'static str {
        match self {
            MetricKind::Sum => "sum",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
            MetricKind::ValueCount => "value_count",
        }
    }
}

/// Value of a single-value metric. `Min`/`Max` are `None` when no value was seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Sum(f64),
    Min(Option<f64>),
    Max(Option<f64>),
    ValueCount(u64),
}

impl MetricValue {
    pub fn empty(kind: MetricKind) -> MetricValue {
        match kind {
            MetricKind::Sum => MetricValue::Sum(0.0),
            MetricKind::Min => MetricValue::Min(None),
            MetricKind::Max => MetricValue::Max(None),
            MetricKind::ValueCount => MetricValue::ValueCount(0),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Sum(_) => MetricKind::Sum,
            MetricValue::Min(_) => MetricKind::Min,
            MetricValue::Max(_) => MetricKind::Max,
            MetricValue::ValueCount(_) => MetricKind::ValueCount,
        }
    }

    /// Folds one observed value into the metric.
    pub fn accept(&mut self, value: f64) {
        match self {
            MetricValue::Sum(sum) => *sum += value,
            MetricValue::Min(min) => *min = Some(min.map_or(value, |m| m.min(value))),
            MetricValue::Max(max) => *max = Some(max.map_or(value, |m| m.max(value))),
            MetricValue::ValueCount(count) => *count += 1,
        }
    }

    /// Combines two partial values of the same kind.
    pub fn merge(&mut self, other: &MetricValue) -> Result<()> {
        match (self, other) {
            (MetricValue::Sum(a), MetricValue::Sum(b)) => *a += b,
            (MetricValue::Min(a), MetricValue::Min(b)) => *a = merge_opt(*a, *b, f64::min),
            (MetricValue::Max(a), MetricValue::Max(b)) => *a = merge_opt(*a, *b, f64::max),
            (MetricValue::ValueCount(a), MetricValue::ValueCount(b)) => {
                *a = a
                    .checked_add(*b)
                    .ok_or_else(|| Error::invalid_operation("value_count overflow"))?;
            }
            (a, b) => {
                return Err(Error::invalid_operation(format!(
                    "cannot merge {} into {}",
                    b.kind().type_name(),
                    a.kind().type_name()
                )));
            }
        }
        Ok(())
    }

    /// Numeric view used by renderers.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            MetricValue::Sum(v) => Some(v),
            MetricValue::Min(v) | MetricValue::Max(v) => v,
            MetricValue::ValueCount(v) => Some(v as f64),
        }
    }
}

fn merge_opt(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalMetric {
    name: String,
    value: MetricValue,
}

impl InternalMetric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> InternalMetric {
        InternalMetric {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &MetricValue {
        &self.value
    }
}

impl Reduce for InternalMetric {
    fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self> {
        ctx.check_canceled()?;
        let mut iter = items.into_iter();
        let Some(mut acc) = iter.next() else {
            return Err(Error::invalid_arg("items", "nothing to reduce"));
        };
        for metric in iter {
            acc.value.merge(&metric.value)?;
        }
        Ok(acc)
    }
}
