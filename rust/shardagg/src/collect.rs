//! Per-shard collectors.
//!
//! An [`AggregatorFactory`] describes one named aggregation and creates a fresh
//! [`BucketCollector`] for every scope that needs one: the shard itself for top-level
//! aggregations, and every matched bucket for sub-aggregations.

use std::sync::Arc;

use ahash::AHashSet;
use shardagg_common::{Result, error::Error};

use crate::aggregation::{
    InternalAggregation, InternalAggregations, InternalMetric, MetricKind, MetricValue,
};

/// Accumulates documents of one scope into a partial result.
pub trait BucketCollector<D>: Send {
    fn collect(&mut self, doc: &D) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<InternalAggregation>;
}

/// A named aggregation definition.
pub trait AggregatorFactory<D>: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn BucketCollector<D>>>;
}

/// The ordered, uniquely named aggregations of one scope.
pub struct AggregatorFactories<D>(Vec<Arc<dyn AggregatorFactory<D>>>);

impl<D> AggregatorFactories<D> {
    pub fn empty() -> AggregatorFactories<D> {
        AggregatorFactories(Vec::new())
    }

    pub fn new(factories: Vec<Arc<dyn AggregatorFactory<D>>>) -> Result<AggregatorFactories<D>> {
        let mut seen = AHashSet::with_capacity(factories.len());
        for factory in &factories {
            if !seen.insert(factory.name()) {
                return Err(Error::invalid_config(format!(
                    "duplicate aggregation name '{}'",
                    factory.name()
                )));
            }
        }
        Ok(AggregatorFactories(factories))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|factory| factory.name())
    }

    pub fn create_collectors(&self) -> Result<BucketCollectors<D>> {
        let collectors = self
            .0
            .iter()
            .map(|factory| factory.create())
            .collect::<Result<Vec<_>>>()?;
        Ok(BucketCollectors(collectors))
    }
}

impl<D> Clone for AggregatorFactories<D> {
    fn clone(&self) -> Self {
        AggregatorFactories(self.0.clone())
    }
}

impl<D> Default for AggregatorFactories<D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<D> std::fmt::Debug for AggregatorFactories<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Live collectors of one scope, in factory order.
pub struct BucketCollectors<D>(Vec<Box<dyn BucketCollector<D>>>);

impl<D> BucketCollectors<D> {
    pub fn collect(&mut self, doc: &D) -> Result<()> {
        for collector in &mut self.0 {
            collector.collect(doc)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<InternalAggregations> {
        let aggregations = self
            .0
            .into_iter()
            .map(|collector| collector.finish())
            .collect::<Result<Vec<_>>>()?;
        InternalAggregations::from_vec(aggregations)
    }
}

/// Extracts the numeric value a metric observes; `None` skips the document.
pub type ValueSource<D> = Arc<dyn Fn(&D) -> Option<f64> + Send + Sync>;

/// Single-value metric over a numeric document field.
pub struct MetricAggregatorFactory<D> {
    name: String,
    kind: MetricKind,
    source: ValueSource<D>,
}

impl<D: 'static> MetricAggregatorFactory<D> {
    pub fn new(name: impl Into<String>, kind: MetricKind, source: ValueSource<D>) -> Self {
        MetricAggregatorFactory {
            name: name.into(),
            kind,
            source,
        }
    }

    pub fn sum<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&D) -> Option<f64> + Send + Sync + 'static,
    {
        Self::new(name, MetricKind::Sum, Arc::new(f))
    }

    pub fn min<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&D) -> Option<f64> + Send + Sync + 'static,
    {
        Self::new(name, MetricKind::Min, Arc::new(f))
    }

    pub fn max<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&D) -> Option<f64> + Send + Sync + 'static,
    {
        Self::new(name, MetricKind::Max, Arc::new(f))
    }

    pub fn value_count<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&D) -> Option<f64> + Send + Sync + 'static,
    {
        Self::new(name, MetricKind::ValueCount, Arc::new(f))
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

impl<D: 'static> AggregatorFactory<D> for MetricAggregatorFactory<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Box<dyn BucketCollector<D>>> {
        Ok(Box::new(MetricCollector {
            name: self.name.clone(),
            value: MetricValue::empty(self.kind),
            source: self.source.clone(),
        }))
    }
}

struct MetricCollector<D> {
    name: String,
    value: MetricValue,
    source: ValueSource<D>,
}

impl<D> BucketCollector<D> for MetricCollector<D> {
    fn collect(&mut self, doc: &D) -> Result<()> {
        if let Some(value) = (self.source)(doc) {
            self.value.accept(value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<InternalAggregation> {
        Ok(InternalMetric::new(self.name, self.value).into())
    }
}
