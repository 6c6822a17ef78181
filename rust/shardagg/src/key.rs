//! Canonical bucket keys.
//!
//! Every shard derives the same key set from the filter names alone, so keys have to
//! be a pure function of the names involved. A singleton bucket is keyed by its
//! filter name. A pair bucket is keyed by the lexicographically smaller name, the
//! separator, then the larger name, which makes `pair_key(a, b) == pair_key(b, a)`.

use ahash::AHashMap;
use shardagg_common::{Result, error::Error};

use crate::config::DEFAULT_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeyScheme {
    separator: String,
}

impl Default for BucketKeyScheme {
    fn default() -> Self {
        BucketKeyScheme {
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl BucketKeyScheme {
    pub fn new(separator: impl Into<String>) -> Result<BucketKeyScheme> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(Error::invalid_config("separator must not be empty"));
        }
        Ok(BucketKeyScheme { separator })
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Checks that `name` can serve as a filter name under this scheme.
    ///
    /// A name containing the separator could make a pair key ambiguous, e.g.
    /// `"a&b"` alone versus the pair `("a", "b")`.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_config("filter name must not be empty"));
        }
        if name.contains(self.separator.as_str()) {
            return Err(Error::invalid_config(format!(
                "filter name '{name}' must not contain the separator '{}'",
                self.separator
            )));
        }
        Ok(())
    }

    pub fn singleton_key(&self, name: &str) -> String {
        name.to_string()
    }

    pub fn pair_key(&self, a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut key = String::with_capacity(lo.len() + self.separator.len() + hi.len());
        key.push_str(lo);
        key.push_str(&self.separator);
        key.push_str(hi);
        key
    }
}

/// The complete, data-independent key set for a list of filter names.
///
/// Slots are laid out in canonical order: singleton keys in filter order, followed
/// by the pair keys of `(i, j)` for `i < j`, ordered by `i` then `j`.
#[derive(Debug, Clone)]
pub struct BucketUniverse {
    filter_count: usize,
    keys: Vec<String>,
    slots: AHashMap<String, usize>,
}

impl BucketUniverse {
    /// Builds the universe. The names must already be validated and unique.
    pub fn new<S: AsRef<str>>(scheme: &BucketKeyScheme, names: &[S]) -> BucketUniverse {
        let n = names.len();
        let mut keys = Vec::with_capacity(Self::expected_len(n));
        keys.extend(names.iter().map(|name| scheme.singleton_key(name.as_ref())));
        for i in 0..n {
            for j in i + 1..n {
                keys.push(scheme.pair_key(names[i].as_ref(), names[j].as_ref()));
            }
        }
        let slots = keys
            .iter()
            .enumerate()
            .map(|(slot, key)| (key.clone(), slot))
            .collect();
        BucketUniverse {
            filter_count: n,
            keys,
            slots,
        }
    }

    /// `N + C(N, 2)` buckets for `N` filters.
    pub fn expected_len(filter_count: usize) -> usize {
        filter_count + filter_count * filter_count.saturating_sub(1) / 2
    }

    pub fn filter_count(&self) -> usize {
        self.filter_count
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn key(&self, slot: usize) -> &str {
        &self.keys[slot]
    }

    pub fn slot_of(&self, key: &str) -> Option<usize> {
        self.slots.get(key).copied()
    }

    #[inline]
    pub fn singleton_slot(&self, filter: usize) -> usize {
        debug_assert!(filter < self.filter_count);
        filter
    }

    /// Slot of the pair bucket for filters `i` and `j`, in either order.
    #[inline]
    pub fn pair_slot(&self, i: usize, j: usize) -> usize {
        debug_assert!(i != j);
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let n = self.filter_count;
        n + i * n - i * (i + 1) / 2 + (j - i - 1)
    }
}
