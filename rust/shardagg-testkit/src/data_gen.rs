//! Seeded generation of tagged documents.

use crate::doc::TagDoc;

/// Filter names `f00`, `f01`, ... in order.
pub fn filter_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("f{i:02}")).collect()
}

/// Generates `count` documents; each tag is attached with probability `density`.
///
/// Values are drawn from `0..100` so sums stay exact in `f64`.
pub fn random_docs<S: AsRef<str>>(seed: u64, count: usize, tags: &[S], density: f64) -> Vec<TagDoc> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count as u64)
        .map(|id| {
            let chosen = tags
                .iter()
                .filter(|_| rng.f64() < density)
                .map(|t| t.as_ref())
                .collect::<Vec<_>>();
            TagDoc::new(id, &chosen).with_value(rng.u32(0..100) as f64)
        })
        .collect()
}

/// Deals `docs` to `shard_count` shards of random sizes; shards may end up empty.
pub fn split_into_shards<T>(seed: u64, docs: Vec<T>, shard_count: usize) -> Vec<Vec<T>> {
    assert_ne!(shard_count, 0);
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut shards = (0..shard_count).map(|_| Vec::new()).collect::<Vec<_>>();
    for doc in docs {
        shards[rng.usize(0..shard_count)].push(doc);
    }
    shards
}
