//! Planning layer of the shard query router.
//!
//! A logical plan over logical tables goes through [`PlanCompiler`]:
//! logical table scans are rewritten into per-shard physical scans, unions
//! are normalized, single-target subtrees become SQL statements, and the
//! result is lowered into a [`DistributedPlan`] arena ready for dispatch.

pub mod catalog;
pub mod compiler;
pub mod explain;
pub mod logical_plan;
pub mod normalize;
pub mod physical_plan;
pub mod physical_planner;
pub mod push_down;
pub mod remote;
pub mod rewriter;
pub mod sql_frontend;
pub mod sql_pushdown;
pub mod unparse;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::*;
pub use compiler::*;
pub use explain::*;
pub use logical_plan::*;
pub use normalize::*;
pub use physical_plan::*;
pub use physical_planner::*;
pub use push_down::*;
pub use remote::*;
pub use rewriter::*;
pub use sql_frontend::*;
pub use sql_pushdown::*;
