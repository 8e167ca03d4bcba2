//! Replace logical table scans with physical per-shard/per-replica scans.

use std::collections::BTreeMap;

use shq_common::{global_metrics, Result, ShqError};
use tracing::debug;

use crate::catalog::{LogicalTable, PhysicalTableLocation, ShardResolver, TableKind};
use crate::logical_plan::{conjunction, Expr, LogicalPlan, PhysicalScan};
use crate::rewriter::RewriteRule;

/// Rewrite rule mapping a `TableScan` of a logical table to physical scans.
///
/// Output shapes:
/// - global table: `Projection(Filter(PhysicalScan))` on one replica;
/// - sharded table: per target, one wrapped scan per location, union-all'ed
///   when a target serves several locations; targets are union-all'ed in
///   ascending name order, and a single target yields no outer union.
///
/// `Filter`/`Projection` wrappers are only emitted when the scan carried
/// filters/a projection.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushDownLogicalTable;

impl RewriteRule for PushDownLogicalTable {
    fn name(&self) -> &str {
        "push_down_logical_table"
    }

    fn rewrite(
        &self,
        node: &LogicalPlan,
        resolver: &dyn ShardResolver,
    ) -> Result<Option<LogicalPlan>> {
        let LogicalPlan::TableScan {
            table,
            projection,
            filters,
        } = node
        else {
            return Ok(None);
        };
        let Some(logical) = resolver.logical_table(table) else {
            debug!(table = %table, "not a logical table; scan left unchanged");
            global_metrics().record_rewrite(table, "passthrough");
            return Ok(None);
        };
        let projection = projection.as_deref();
        let plan = match logical.kind {
            TableKind::Global => global_scan(&logical, filters, projection, resolver)?,
            TableKind::Sharded => sharded_scan(&logical, filters, projection, resolver)?,
        };
        global_metrics().record_rewrite(table, &logical.kind.to_string());
        Ok(Some(plan))
    }
}

/// Apply the push-down rewrite to one scan node.
///
/// Nodes that are not scans of a logical table are returned unchanged.
pub fn rewrite_scan(scan: &LogicalPlan, resolver: &dyn ShardResolver) -> Result<LogicalPlan> {
    Ok(PushDownLogicalTable
        .rewrite(scan, resolver)?
        .unwrap_or_else(|| scan.clone()))
}

fn global_scan(
    table: &LogicalTable,
    filters: &[Expr],
    projection: Option<&[String]>,
    resolver: &dyn ShardResolver,
) -> Result<LogicalPlan> {
    let location = resolver.resolve_global_replica(table)?;
    debug!(
        table = %table.name,
        unique_name = %location.unique_name,
        backend = %location.target,
        "global table routed to replica"
    );
    Ok(wrap_scan(physical_scan(table, location), filters, projection))
}

fn sharded_scan(
    table: &LogicalTable,
    filters: &[Expr],
    projection: Option<&[String]>,
    resolver: &dyn ShardResolver,
) -> Result<LogicalPlan> {
    let locations = resolver.resolve_locations(table, filters)?;
    if locations.is_empty() {
        return Err(ShqError::ShardResolutionEmpty {
            table: table.name.clone(),
        });
    }
    let location_count = locations.len();

    let mut by_target: BTreeMap<String, Vec<LogicalPlan>> = BTreeMap::new();
    for location in locations {
        by_target
            .entry(location.target.clone())
            .or_default()
            .push(wrap_scan(physical_scan(table, location), filters, projection));
    }
    debug!(
        table = %table.name,
        locations = location_count,
        targets = by_target.len(),
        "sharded table expanded"
    );

    let mut groups = by_target
        .into_values()
        .map(|mut scans| {
            if scans.len() == 1 {
                scans.remove(0)
            } else {
                LogicalPlan::Union { inputs: scans }
            }
        })
        .collect::<Vec<_>>();
    if groups.len() == 1 {
        Ok(groups.remove(0))
    } else {
        Ok(LogicalPlan::Union { inputs: groups })
    }
}

fn physical_scan(table: &LogicalTable, location: PhysicalTableLocation) -> LogicalPlan {
    LogicalPlan::PhysicalScan(PhysicalScan {
        logical_table: table.name.clone(),
        kind: table.kind,
        location,
        schema: table.schema.clone(),
    })
}

fn wrap_scan(scan: LogicalPlan, filters: &[Expr], projection: Option<&[String]>) -> LogicalPlan {
    let mut plan = scan;
    if let Some(predicate) = conjunction(filters.iter().cloned()) {
        plan = LogicalPlan::Filter {
            predicate,
            input: Box::new(plan),
        };
    }
    if let Some(columns) = projection {
        plan = LogicalPlan::Projection {
            exprs: columns
                .iter()
                .map(|c| (Expr::Column(c.clone()), c.clone()))
                .collect(),
            input: Box::new(plan),
        };
    }
    plan
}
