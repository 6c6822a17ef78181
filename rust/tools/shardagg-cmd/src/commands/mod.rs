//! Command implementations for shardagg-cmd

pub mod inspect;
pub mod matrix;
