//! Reference shard catalog: JSON-described logical tables with shard and
//! replica placement, implementing the planner's `ShardResolver`.

pub mod catalog;

pub use catalog::*;
