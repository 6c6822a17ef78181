//! Named document predicates.

use std::sync::Arc;

use ahash::AHashSet;
use shardagg_common::{Result, error::Error};

use crate::{
    config::AdjacencyMatrixConfig,
    key::{BucketKeyScheme, BucketUniverse},
};

/// A boolean document predicate supplied by the query execution layer.
///
/// A predicate is evaluated at most once per document and bucket set; a failure
/// abandons the whole shard computation.
pub trait DocPredicate<D>: Send + Sync {
    fn matches(&self, doc: &D) -> Result<bool>;
}

impl<D, F> DocPredicate<D> for F
where
    F: Fn(&D) -> Result<bool> + Send + Sync,
{
    fn matches(&self, doc: &D) -> Result<bool> {
        self(doc)
    }
}

pub struct Filter<D> {
    name: String,
    predicate: Arc<dyn DocPredicate<D>>,
}

impl<D> Filter<D> {
    pub fn new(name: impl Into<String>, predicate: impl DocPredicate<D> + 'static) -> Filter<D> {
        Filter {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Wraps an infallible predicate.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Filter<D>
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
        D: 'static,
    {
        Self::new(name, move |doc: &D| Ok(f(doc)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn matches(&self, doc: &D) -> Result<bool> {
        self.predicate.matches(doc)
    }
}

impl<D> Clone for Filter<D> {
    fn clone(&self) -> Self {
        Filter {
            name: self.name.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<D> std::fmt::Debug for Filter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An ordered, validated list of named filters, together with the bucket universe
/// it induces.
///
/// Built once per request and read-only afterwards; evaluators share it through
/// an `Arc`.
pub struct FilterSet<D> {
    filters: Vec<Filter<D>>,
    scheme: BucketKeyScheme,
    universe: BucketUniverse,
}

impl<D> FilterSet<D> {
    pub fn new(filters: Vec<Filter<D>>) -> Result<FilterSet<D>> {
        Self::with_config(filters, &AdjacencyMatrixConfig::default())
    }

    /// Validates the filters against `config`.
    ///
    /// Fails with `InvalidConfiguration` when the list is empty or longer than
    /// `max_filters`, or when any name is empty, duplicated or contains the separator.
    pub fn with_config(
        filters: Vec<Filter<D>>,
        config: &AdjacencyMatrixConfig,
    ) -> Result<FilterSet<D>> {
        config.validate()?;
        let scheme = BucketKeyScheme::new(config.separator.clone())?;
        if filters.is_empty() {
            return Err(Error::invalid_config("at least one filter is required"));
        }
        if filters.len() > config.max_filters {
            return Err(Error::invalid_config(format!(
                "number of filters is too large, must be at most {} but was {}",
                config.max_filters,
                filters.len()
            )));
        }

        let mut seen = AHashSet::with_capacity(filters.len());
        for filter in &filters {
            scheme.validate_name(filter.name())?;
            if !seen.insert(filter.name()) {
                return Err(Error::invalid_config(format!(
                    "duplicate filter name '{}'",
                    filter.name()
                )));
            }
        }

        let names = filters.iter().map(Filter::name).collect::<Vec<_>>();
        let universe = BucketUniverse::new(&scheme, &names);
        Ok(FilterSet {
            filters,
            scheme,
            universe,
        })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Filter<D>] {
        &self.filters
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter<D>> {
        self.filters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(Filter::name)
    }

    pub fn scheme(&self) -> &BucketKeyScheme {
        &self.scheme
    }

    pub fn universe(&self) -> &BucketUniverse {
        &self.universe
    }
}

impl<D> std::fmt::Debug for FilterSet<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSet")
            .field("filters", &self.names().collect::<Vec<_>>())
            .field("separator", &self.scheme.separator())
            .finish()
    }
}
