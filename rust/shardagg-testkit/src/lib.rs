//! Test utilities for the shardagg workspace.
//!
//! - [`doc`]: a tagged test document
//! - [`data_gen`]: seeded pseudo-random documents and shard layouts
//! - [`strategies`]: `proptest` strategies for filter names and count tables
//! - [`files`]: ndjson shard files in temporary directories

pub mod data_gen;
pub mod doc;
pub mod files;
pub mod strategies;
