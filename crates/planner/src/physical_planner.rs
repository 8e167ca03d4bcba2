use shq_common::{Result, ShqError};

use crate::logical_plan::{project_schema, LogicalPlan};
use crate::physical_plan::{
    DistributedPlan, FilterExec, LimitExec, NodeId, PlanNode, ProjectExec, RemoteScanExec,
    UnionExec,
};

/// Lower a fully pushed-down logical plan into the [`DistributedPlan`] arena.
///
/// Contracts:
/// - every leaf must already be a remote scan; `TableScan` and
///   `PhysicalScan` leaves are planning errors;
/// - union branches keep their order;
/// - node schemas are computed once here and never change afterwards.
pub fn create_distributed_plan(logical: &LogicalPlan) -> Result<DistributedPlan> {
    let mut plan = DistributedPlan {
        nodes: Vec::new(),
        schemas: Vec::new(),
        root: NodeId(0),
    };
    plan.root = lower(logical, &mut plan)?;
    Ok(plan)
}

fn lower(logical: &LogicalPlan, plan: &mut DistributedPlan) -> Result<NodeId> {
    let (node, schema) = match logical {
        LogicalPlan::TableScan { table, .. } => {
            return Err(ShqError::Planning(format!(
                "table {table} was not rewritten to physical scans"
            )))
        }
        LogicalPlan::PhysicalScan(scan) => {
            return Err(ShqError::Planning(format!(
                "physical scan of {} at {} has no remote statement",
                scan.logical_table, scan.location.unique_name
            )))
        }
        LogicalPlan::RemoteScan(scan) => (
            PlanNode::RemoteScan(RemoteScanExec {
                target: scan.target.clone(),
                physical_tables: scan
                    .physical_tables()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                query: scan.query.clone(),
                sql: scan.sql(),
                schema: scan.schema_ref(),
            }),
            scan.schema_ref(),
        ),
        LogicalPlan::Filter { predicate, input } => {
            let input = lower(input, plan)?;
            let schema = plan.node_schema(input)?;
            (
                PlanNode::Filter(FilterExec {
                    predicate: predicate.clone(),
                    input,
                }),
                schema,
            )
        }
        LogicalPlan::Projection { exprs, input } => {
            let input = lower(input, plan)?;
            let schema = project_schema(exprs, plan.node_schema(input)?.as_ref())?;
            (
                PlanNode::Project(ProjectExec {
                    exprs: exprs.clone(),
                    input,
                }),
                schema,
            )
        }
        LogicalPlan::Limit { n, input } => {
            let input = lower(input, plan)?;
            let schema = plan.node_schema(input)?;
            (PlanNode::Limit(LimitExec { n: *n, input }), schema)
        }
        LogicalPlan::Union { inputs } => {
            if inputs.is_empty() {
                return Err(ShqError::Planning("union without inputs".to_string()));
            }
            let inputs = inputs
                .iter()
                .map(|i| lower(i, plan))
                .collect::<Result<Vec<_>>>()?;
            let schema = plan.node_schema(inputs[0])?;
            for id in &inputs[1..] {
                let other = plan.node_schema(*id)?;
                if other.fields().len() != schema.fields().len() {
                    return Err(ShqError::Planning(format!(
                        "union branches disagree on column count: {} vs {}",
                        schema.fields().len(),
                        other.fields().len()
                    )));
                }
            }
            (PlanNode::Union(UnionExec { inputs }), schema)
        }
    };
    plan.nodes.push(node);
    plan.schemas.push(schema);
    Ok(NodeId(plan.nodes.len() - 1))
}
