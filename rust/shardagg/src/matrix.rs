//! The adjacency matrix result: one bucket per filter and per filter pair.

use ahash::AHashMap;
use shardagg_common::{Result, error::Error};

use crate::{
    aggregation::{InternalAggregations, Metadata},
    key::BucketUniverse,
    reduce::{Reduce, ReduceContext},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    key: String,
    doc_count: u64,
    aggregations: InternalAggregations,
}

impl Bucket {
    pub fn new(key: impl Into<String>, doc_count: u64, aggregations: InternalAggregations) -> Bucket {
        Bucket {
            key: key.into(),
            doc_count,
            aggregations,
        }
    }

    pub fn empty(key: impl Into<String>) -> Bucket {
        Bucket::new(key, 0, InternalAggregations::empty())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn aggregations(&self) -> &InternalAggregations {
        &self.aggregations
    }

    pub fn into_parts(self) -> (String, u64, InternalAggregations) {
        (self.key, self.doc_count, self.aggregations)
    }
}

/// A partial (per-shard) or final adjacency matrix.
///
/// Buckets are kept in canonical universe order. A freshly evaluated matrix always
/// carries the complete universe, including buckets no document matched.
///
/// The first `universe_len` buckets form the universe shared by every input merged
/// into this matrix. Buckets past it come from lenient merges of inputs with differing
/// universes and are kept sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalAdjacencyMatrix {
    name: String,
    buckets: Vec<Bucket>,
    universe_len: usize,
    metadata: Option<Metadata>,
}

impl InternalAdjacencyMatrix {
    pub fn new(
        name: impl Into<String>,
        buckets: Vec<Bucket>,
        metadata: Option<Metadata>,
    ) -> InternalAdjacencyMatrix {
        InternalAdjacencyMatrix {
            name: name.into(),
            universe_len: buckets.len(),
            buckets,
            metadata,
        }
    }

    /// Marks the buckets from `universe_len` on as lenient-merge extras.
    pub(crate) fn with_universe_len(mut self, universe_len: usize) -> InternalAdjacencyMatrix {
        self.universe_len = universe_len.min(self.buckets.len());
        self
    }

    /// A matrix with every bucket of `universe` at zero.
    pub fn empty(
        name: impl Into<String>,
        universe: &BucketUniverse,
        metadata: Option<Metadata>,
    ) -> InternalAdjacencyMatrix {
        let buckets = universe.keys().iter().map(Bucket::empty).collect();
        Self::new(name, buckets, metadata)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Number of leading buckets that belong to the shared universe.
    pub fn universe_len(&self) -> usize {
        self.universe_len
    }

    pub fn bucket(&self, key: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|bucket| bucket.key == key)
    }

    /// Doc count of `key`; absent keys count as zero.
    pub fn doc_count(&self, key: &str) -> u64 {
        self.bucket(key).map_or(0, Bucket::doc_count)
    }

    /// Buckets matched by at least one document, in canonical order.
    pub fn non_empty_buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter().filter(|bucket| bucket.doc_count > 0)
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn into_parts(self) -> (String, Vec<Bucket>, Option<Metadata>) {
        (self.name, self.buckets, self.metadata)
    }
}

impl Reduce for InternalAdjacencyMatrix {
    /// Merges matrices by bucket key.
    ///
    /// The output universe is the intersection of the input universes, in the first
    /// input's order. Every other key is tolerated (lenient merge) and placed after
    /// the universe in lexicographic order. Intersection is associative and
    /// commutative, so neither input order nor intermediate reduction passes change
    /// the output. Name and metadata are taken from the first input.
    fn reduce(items: Vec<Self>, ctx: &ReduceContext) -> Result<Self> {
        ctx.check_canceled()?;
        let mut iter = items.into_iter();
        let Some(first) = iter.next() else {
            return Err(Error::invalid_arg("items", "nothing to reduce"));
        };

        let name = first.name.clone();
        let metadata = first.metadata.clone();
        let mut acc = BucketAccumulator::default();
        acc.merge(first)?;
        for matrix in iter {
            ctx.check_canceled()?;
            if matrix.name != name {
                log::warn!(
                    "reducing adjacency matrix '{}' into '{name}'",
                    matrix.name
                );
            }
            acc.merge(matrix)?;
        }
        let (buckets, universe_len) = acc.finish(ctx)?;
        Ok(InternalAdjacencyMatrix::new(name, buckets, metadata).with_universe_len(universe_len))
    }
}

struct Accumulated {
    key: String,
    doc_count: u64,
    aggregations: Vec<InternalAggregations>,
    /// Number of inputs whose universe holds this key.
    universe_hits: usize,
    /// Index of the last input counted in `universe_hits`.
    last_hit: Option<usize>,
}

/// Per-key accumulation state for one reduce call.
#[derive(Default)]
struct BucketAccumulator {
    entries: Vec<Accumulated>,
    slots: AHashMap<String, usize>,
    inputs: usize,
}

impl BucketAccumulator {
    fn merge(&mut self, matrix: InternalAdjacencyMatrix) -> Result<()> {
        let input = self.inputs;
        self.inputs += 1;
        let universe_len = matrix.universe_len;
        for (position, bucket) in matrix.buckets.into_iter().enumerate() {
            let (key, doc_count, aggregations) = bucket.into_parts();
            let slot = match self.slots.get(&key) {
                Some(&slot) => {
                    let entry = &mut self.entries[slot];
                    entry.doc_count = entry.doc_count.checked_add(doc_count).ok_or_else(|| {
                        Error::invalid_operation(format!("doc_count overflow in bucket '{key}'"))
                    })?;
                    entry.aggregations.push(aggregations);
                    slot
                }
                None => {
                    if input > 0 {
                        log::warn!("lenient merge: bucket '{key}' is not part of the first input");
                    }
                    self.slots.insert(key.clone(), self.entries.len());
                    self.entries.push(Accumulated {
                        key,
                        doc_count,
                        aggregations: vec![aggregations],
                        universe_hits: 0,
                        last_hit: None,
                    });
                    self.entries.len() - 1
                }
            };
            let entry = &mut self.entries[slot];
            if position < universe_len && entry.last_hit != Some(input) {
                entry.universe_hits += 1;
                entry.last_hit = Some(input);
            }
        }
        Ok(())
    }

    fn finish(self, ctx: &ReduceContext) -> Result<(Vec<Bucket>, usize)> {
        let inputs = self.inputs;
        let (mut entries, mut extras): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|entry| entry.universe_hits == inputs);
        let universe_len = entries.len();
        extras.sort_by(|a, b| a.key.cmp(&b.key));
        entries.append(&mut extras);
        ctx.consume_buckets(entries.len() as u64)?;

        let mut buckets = Vec::with_capacity(entries.len());
        for entry in entries {
            let aggregations = if entry.aggregations.iter().all(InternalAggregations::is_empty) {
                InternalAggregations::empty()
            } else {
                InternalAggregations::reduce(entry.aggregations, ctx)?
            };
            buckets.push(Bucket::new(entry.key, entry.doc_count, aggregations));
        }
        Ok((buckets, universe_len))
    }
}
