//! Parallel data processing utilities.
//!
//! This module provides functions for processing collections of data either sequentially
//! or in parallel, depending on the size of the collection and the specified degree of
//! parallelism. The functions automatically choose the most appropriate execution strategy.
//!
//! [`map`] transforms each item and collects the results in input order. It runs on
//! the global rayon pool and falls back to sequential processing for small
//! collections or when parallelism is disabled.

use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

/// Maps a function over an iterator, optionally in parallel, returning an iterator of
/// results in input order.
///
/// # Arguments
///
/// * `max_degree` - Optional maximum number of parallel tasks. If `None`, uses all
///   threads of the global pool. If 1 or less, forces sequential execution.
/// * `items` - An iterator of items to process
/// * `f` - The function to apply to each item, transforming `T` to `R`
///
/// # Behavior
///
/// - If there's only 1 item or fewer to process, executes sequentially
/// - If `max_degree` is 1 or less, executes sequentially
/// - Otherwise, the items are split into at most `max_degree` contiguous runs that
///   execute concurrently; all results are collected before returning the iterator
pub fn map<T, F, R>(
    max_degree: Option<usize>,
    items: impl IntoIterator<Item = T>,
    f: F,
) -> impl Iterator<Item = R>
where
    F: Fn(T) -> R + Send + Sync,
    T: Send,
    R: Send,
{
    let items = items.into_iter().collect::<Vec<_>>();
    let degree = effective_degree(max_degree, items.len());
    let results = if degree <= 1 {
        items.into_iter().map(f).collect::<Vec<_>>()
    } else {
        log::trace!("data_parallel::map: {} items, degree {degree}", items.len());
        let min_len = items.len().div_ceil(degree);
        items
            .into_par_iter()
            .with_min_len(min_len)
            .map(f)
            .collect::<Vec<_>>()
    };
    results.into_iter()
}

fn effective_degree(max_degree: Option<usize>, len: usize) -> usize {
    max_degree
        .unwrap_or_else(rayon::current_num_threads)
        .min(len)
}
