//! Boundary to the catalog/metadata service that owns shard placement.

use std::fmt;

use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};
use shq_common::Result;

use crate::logical_plan::Expr;

/// Distribution of a logical table across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Rows are partitioned over many physical tables.
    Sharded,
    /// Every replica holds all rows; any one replica can answer a read.
    Global,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Sharded => write!(f, "sharded"),
            TableKind::Global => write!(f, "global"),
        }
    }
}

/// One concrete backend copy of a shard or replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalTableLocation {
    /// Distinct per location, qualified as the backend expects (`db.table`).
    pub unique_name: String,
    /// Backend/datasource serving the location; may repeat across locations.
    pub target: String,
}

impl PhysicalTableLocation {
    pub fn new(unique_name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            target: target.into(),
        }
    }
}

/// User-facing table as registered in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTable {
    pub name: String,
    pub kind: TableKind,
    pub schema: SchemaRef,
}

/// Shard placement provider consulted by the push-down rewrite.
///
/// Pruning is entirely the resolver's business; the rewriter treats the
/// returned location list as opaque and ordered.
pub trait ShardResolver: Send + Sync {
    /// `None` when `name` is not a logical table; the scan is then left as is.
    fn logical_table(&self, name: &str) -> Option<LogicalTable>;

    /// Locations that may hold rows matching every predicate in `predicates`.
    fn resolve_locations(
        &self,
        table: &LogicalTable,
        predicates: &[Expr],
    ) -> Result<Vec<PhysicalTableLocation>>;

    /// Representative replica of a global table for ordinary reads.
    fn resolve_global_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation>;

    /// Write-capable replica of a global table, used for locking reads.
    fn resolve_primary_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation> {
        self.resolve_global_replica(table)
    }
}
