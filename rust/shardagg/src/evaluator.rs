//! Shard-local evaluation of adjacency matrices.
//!
//! For every document the collector evaluates each filter exactly once, then
//! increments the singleton bucket of every matched filter and the pair bucket of every
//! matched pair. The bucket slots are fixed by the [`BucketUniverse`], so a shard's
//! result always carries the full key set, zero counts included.

use std::sync::Arc;

use shardagg_common::{Result, error::Error};
use shardagg_workflow::cancel::CancellationToken;

use crate::{
    aggregation::{InternalAggregation, InternalAggregations, Metadata},
    collect::{AggregatorFactories, AggregatorFactory, BucketCollector, BucketCollectors},
    config::DEFAULT_DOC_BATCH_SIZE,
    filter::FilterSet,
    key::BucketUniverse,
    matrix::{Bucket, InternalAdjacencyMatrix},
};

/// Definition of an adjacency matrix aggregation.
pub struct AdjacencyMatrixAggregation<D> {
    name: String,
    filters: Arc<FilterSet<D>>,
    sub_aggregations: AggregatorFactories<D>,
    metadata: Option<Metadata>,
    doc_batch_size: usize,
}

impl<D: 'static> AdjacencyMatrixAggregation<D> {
    pub fn new(
        name: impl Into<String>,
        filters: Arc<FilterSet<D>>,
    ) -> Result<AdjacencyMatrixAggregation<D>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_config("aggregation name must not be empty"));
        }
        Ok(AdjacencyMatrixAggregation {
            name,
            filters,
            sub_aggregations: AggregatorFactories::empty(),
            metadata: None,
            doc_batch_size: DEFAULT_DOC_BATCH_SIZE,
        })
    }

    pub fn with_sub_aggregations(mut self, sub_aggregations: AggregatorFactories<D>) -> Self {
        self.sub_aggregations = sub_aggregations;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Number of documents between two cancellation checks in
    /// [`evaluate_shard`](Self::evaluate_shard).
    pub fn with_doc_batch_size(mut self, doc_batch_size: usize) -> Result<Self> {
        if doc_batch_size == 0 {
            return Err(Error::invalid_config("doc_batch_size must be positive"));
        }
        self.doc_batch_size = doc_batch_size;
        Ok(self)
    }

    pub fn filters(&self) -> &FilterSet<D> {
        &self.filters
    }

    pub fn universe(&self) -> &BucketUniverse {
        self.filters.universe()
    }

    pub fn collector(&self) -> Result<AdjacencyMatrixCollector<D>> {
        Ok(AdjacencyMatrixCollector::new(
            self.name.clone(),
            self.filters.clone(),
            self.sub_aggregations.clone(),
            self.metadata.clone(),
        ))
    }

    /// Evaluates the matrix over one shard's documents.
    ///
    /// An error yielded by the document stream, a filter or a sub-aggregation is
    /// reported as a shard-local evaluation failure. Cancellation is observed between
    /// document batches.
    pub fn evaluate_shard<I>(
        &self,
        docs: I,
        cancellation: &CancellationToken,
    ) -> Result<InternalAdjacencyMatrix>
    where
        I: IntoIterator<Item = Result<D>>,
    {
        let mut collector = self.collector()?;
        drive(docs, self.doc_batch_size, cancellation, |doc| {
            collector.collect_doc(doc)
        })?;
        collector.into_matrix()
    }
}

impl<D: 'static> AggregatorFactory<D> for AdjacencyMatrixAggregation<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Box<dyn BucketCollector<D>>> {
        Ok(Box::new(self.collector()?))
    }
}

impl<D> std::fmt::Debug for AdjacencyMatrixAggregation<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjacencyMatrixAggregation")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("sub_aggregations", &self.sub_aggregations)
            .finish_non_exhaustive()
    }
}

/// Mutable per-shard state of one adjacency matrix.
pub struct AdjacencyMatrixCollector<D> {
    name: String,
    filters: Arc<FilterSet<D>>,
    sub_aggregations: AggregatorFactories<D>,
    metadata: Option<Metadata>,
    counts: Vec<u64>,
    /// Created on the first match of the bucket.
    sub_collectors: Vec<Option<BucketCollectors<D>>>,
    /// Scratch list of the filters matched by the current document.
    matched: Vec<usize>,
}

impl<D> AdjacencyMatrixCollector<D> {
    fn new(
        name: String,
        filters: Arc<FilterSet<D>>,
        sub_aggregations: AggregatorFactories<D>,
        metadata: Option<Metadata>,
    ) -> AdjacencyMatrixCollector<D> {
        let slots = filters.universe().len();
        let sub_collectors = if sub_aggregations.is_empty() {
            Vec::new()
        } else {
            (0..slots).map(|_| None).collect()
        };
        AdjacencyMatrixCollector {
            name,
            matched: Vec::with_capacity(filters.len()),
            filters,
            sub_aggregations,
            metadata,
            counts: vec![0; slots],
            sub_collectors,
        }
    }

    pub fn collect_doc(&mut self, doc: &D) -> Result<()> {
        let mut matched = std::mem::take(&mut self.matched);
        matched.clear();
        for (i, filter) in self.filters.iter().enumerate() {
            let hit = filter.matches(doc).map_err(|e| {
                shard_local(format!("filter '{}' of '{}'", filter.name(), self.name), e)
            })?;
            if hit {
                matched.push(i);
            }
        }

        let filters = Arc::clone(&self.filters);
        let result = self.increment_matched(&matched, filters.universe(), doc);
        self.matched = matched;
        result
    }

    fn increment_matched(
        &mut self,
        matched: &[usize],
        universe: &BucketUniverse,
        doc: &D,
    ) -> Result<()> {
        for (k, &i) in matched.iter().enumerate() {
            self.increment(universe.singleton_slot(i), universe, doc)?;
            for &j in &matched[k + 1..] {
                self.increment(universe.pair_slot(i, j), universe, doc)?;
            }
        }
        Ok(())
    }

    fn increment(&mut self, slot: usize, universe: &BucketUniverse, doc: &D) -> Result<()> {
        self.counts[slot] += 1;
        if self.sub_aggregations.is_empty() {
            return Ok(());
        }
        let context = || {
            format!("sub-aggregation of bucket '{}' in '{}'", universe.key(slot), self.name)
        };
        let entry = &mut self.sub_collectors[slot];
        if entry.is_none() {
            let collectors = self
                .sub_aggregations
                .create_collectors()
                .map_err(|e| shard_local(context(), e))?;
            *entry = Some(collectors);
        }
        if let Some(collectors) = entry {
            collectors
                .collect(doc)
                .map_err(|e| shard_local(context(), e))?;
        }
        Ok(())
    }

    /// Emits the full bucket universe in canonical order.
    pub fn into_matrix(self) -> Result<InternalAdjacencyMatrix> {
        let universe = self.filters.universe();
        let mut sub_collectors = self.sub_collectors.into_iter();
        let mut buckets = Vec::with_capacity(universe.len());
        for (slot, &count) in self.counts.iter().enumerate() {
            let aggregations = match sub_collectors.next().flatten() {
                Some(collectors) => collectors.finish().map_err(|e| {
                    shard_local(
                        format!("sub-aggregation of bucket '{}' in '{}'", universe.key(slot), self.name),
                        e,
                    )
                })?,
                None => InternalAggregations::empty(),
            };
            buckets.push(Bucket::new(universe.key(slot), count, aggregations));
        }
        log::trace!(
            "adjacency matrix '{}': {} buckets, {} non-empty",
            self.name,
            buckets.len(),
            self.counts.iter().filter(|&&c| c > 0).count()
        );
        Ok(InternalAdjacencyMatrix::new(self.name, buckets, self.metadata))
    }
}

impl<D> BucketCollector<D> for AdjacencyMatrixCollector<D> {
    fn collect(&mut self, doc: &D) -> Result<()> {
        self.collect_doc(doc)
    }

    fn finish(self: Box<Self>) -> Result<InternalAggregation> {
        self.into_matrix().map(Into::into)
    }
}

/// Evaluates a set of top-level aggregations over shard documents.
pub struct ShardEvaluator<D> {
    aggregations: AggregatorFactories<D>,
    doc_batch_size: usize,
}

impl<D> ShardEvaluator<D> {
    pub fn new(aggregations: AggregatorFactories<D>, doc_batch_size: usize) -> Result<Self> {
        if aggregations.is_empty() {
            return Err(Error::invalid_config("at least one aggregation is required"));
        }
        if doc_batch_size == 0 {
            return Err(Error::invalid_config("doc_batch_size must be positive"));
        }
        Ok(ShardEvaluator {
            aggregations,
            doc_batch_size,
        })
    }

    pub fn aggregations(&self) -> &AggregatorFactories<D> {
        &self.aggregations
    }

    pub fn evaluate<I>(&self, docs: I, cancellation: &CancellationToken) -> Result<InternalAggregations>
    where
        I: IntoIterator<Item = Result<D>>,
    {
        let mut collectors = self
            .aggregations
            .create_collectors()
            .map_err(|e| shard_local("shard evaluation", e))?;
        drive(docs, self.doc_batch_size, cancellation, |doc| {
            collectors
                .collect(doc)
                .map_err(|e| shard_local("shard evaluation", e))
        })?;
        collectors
            .finish()
            .map_err(|e| shard_local("shard evaluation", e))
    }
}

impl<D> Clone for ShardEvaluator<D> {
    fn clone(&self) -> Self {
        ShardEvaluator {
            aggregations: self.aggregations.clone(),
            doc_batch_size: self.doc_batch_size,
        }
    }
}

fn drive<D, I>(
    docs: I,
    batch_size: usize,
    cancellation: &CancellationToken,
    mut f: impl FnMut(&D) -> Result<()>,
) -> Result<u64>
where
    I: IntoIterator<Item = Result<D>>,
{
    let mut count = 0u64;
    for doc in docs {
        if count % batch_size as u64 == 0 {
            cancellation
                .check()
                .map_err(|canceled| Error::canceled(canceled.to_string()))?;
        }
        let doc = doc.map_err(|e| shard_local("document stream", e))?;
        f(&doc)?;
        count += 1;
    }
    Ok(count)
}

/// Wraps `err` as an evaluation failure unless it already is one or is a cancellation.
fn shard_local(context: impl Into<String>, err: Error) -> Error {
    if err.is_shard_local() || err.is_canceled() {
        err
    } else {
        Error::evaluation(context, err)
    }
}
