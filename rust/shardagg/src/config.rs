//! Request-level configuration for evaluation and reduction.

use serde::Deserialize;
use shardagg_common::{Result, error::Error};

/// Separator placed between the two filter names of a pair bucket key.
pub const DEFAULT_SEPARATOR: &str = "&";

/// Maximum number of filters accepted by a single adjacency matrix.
pub const DEFAULT_MAX_FILTERS: usize = 100;

/// Number of documents evaluated between two cancellation checks.
pub const DEFAULT_DOC_BATCH_SIZE: usize = 1024;

/// Number of partial results folded by one reduction step.
pub const DEFAULT_BATCH_REDUCE_SIZE: usize = 512;

/// Ceiling on the number of buckets materialized by a whole reduction tree.
pub const DEFAULT_MAX_BUCKETS: u64 = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdjacencyMatrixConfig {
    pub separator: String,
    pub max_filters: usize,
    pub doc_batch_size: usize,
}

impl Default for AdjacencyMatrixConfig {
    fn default() -> Self {
        AdjacencyMatrixConfig {
            separator: DEFAULT_SEPARATOR.to_string(),
            max_filters: DEFAULT_MAX_FILTERS,
            doc_batch_size: DEFAULT_DOC_BATCH_SIZE,
        }
    }
}

impl AdjacencyMatrixConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid_config(format!("adjacency matrix config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(Error::invalid_config("separator must not be empty"));
        }
        if self.max_filters == 0 {
            return Err(Error::invalid_config("max_filters must be positive"));
        }
        if self.doc_batch_size == 0 {
            return Err(Error::invalid_config("doc_batch_size must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReduceConfig {
    /// Inputs beyond this count trigger intermediate reduction passes.
    pub batch_reduce_size: usize,
    pub max_buckets: u64,
    /// Degree of parallelism for shard evaluation and intermediate passes.
    /// `None` uses every thread of the global pool.
    pub max_parallelism: Option<usize>,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        ReduceConfig {
            batch_reduce_size: DEFAULT_BATCH_REDUCE_SIZE,
            max_buckets: DEFAULT_MAX_BUCKETS,
            max_parallelism: None,
        }
    }
}

impl ReduceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid_config(format!("reduce config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_reduce_size < 2 {
            return Err(Error::invalid_config(format!(
                "batch_reduce_size must be at least 2, got {}",
                self.batch_reduce_size
            )));
        }
        Ok(())
    }

    pub fn with_batch_reduce_size(mut self, batch_reduce_size: usize) -> Self {
        self.batch_reduce_size = batch_reduce_size;
        self
    }

    pub fn with_max_buckets(mut self, max_buckets: u64) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: Option<usize>) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }
}
