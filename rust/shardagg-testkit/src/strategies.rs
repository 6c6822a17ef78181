//! `proptest` strategies.

use proptest::prelude::*;

/// A filter name that never contains `&`.
pub fn filter_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

/// Between `min` and `max` distinct filter names, in arbitrary order.
pub fn filter_names(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(filter_name(), min..=max)
        .prop_map(|names| names.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// `rows` count vectors of length `width`, one per partial result.
pub fn count_rows(width: usize, rows: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(0u64..1_000, width), rows)
}

/// Tag subsets of `tags`, one per document.
pub fn tag_sets(tags: Vec<String>, max_docs: usize) -> impl Strategy<Value = Vec<Vec<String>>> {
    let width = tags.len();
    prop::collection::vec(prop::collection::vec(any::<bool>(), width), 0..=max_docs).prop_map(
        move |rows| {
            rows.into_iter()
                .map(|mask| {
                    tags.iter()
                        .zip(mask)
                        .filter(|(_, on)| *on)
                        .map(|(t, _)| t.clone())
                        .collect()
                })
                .collect()
        },
    )
}
