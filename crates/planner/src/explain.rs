use crate::logical_plan::LogicalPlan;
use crate::physical_plan::{DistributedPlan, NodeId, PlanNode};
use crate::unparse::expr_to_sql;

/// Render logical plan as human-readable multiline text.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

fn fmt_plan(plan: &LogicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        LogicalPlan::TableScan {
            table,
            projection,
            filters,
        } => {
            out.push_str(&format!("{pad}TableScan table={table}\n"));
            out.push_str(&format!("{pad}  projection={:?}\n", projection));
            out.push_str(&format!("{pad}  pushed_filters={}\n", filters.len()));
            for f in filters {
                out.push_str(&format!("{pad}    {}\n", expr_to_sql(f)));
            }
        }
        LogicalPlan::PhysicalScan(scan) => {
            out.push_str(&format!(
                "{pad}PhysicalScan table={} kind={} location={} target={}\n",
                scan.logical_table, scan.kind, scan.location.unique_name, scan.location.target
            ));
        }
        LogicalPlan::RemoteScan(scan) => {
            out.push_str(&format!(
                "{pad}RemoteScan target={} tables={:?}\n",
                scan.target,
                scan.physical_tables()
            ));
            out.push_str(&format!("{pad}  sql={}\n", scan.sql()));
        }
        LogicalPlan::Filter { predicate, input } => {
            out.push_str(&format!("{pad}Filter {}\n", expr_to_sql(predicate)));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Projection { exprs, input } => {
            out.push_str(&format!("{pad}Projection\n"));
            for (e, name) in exprs {
                out.push_str(&format!("{pad}  {name} := {}\n", expr_to_sql(e)));
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Union { inputs } => {
            out.push_str(&format!("{pad}UnionAll branches={}\n", inputs.len()));
            for input in inputs {
                fmt_plan(input, indent + 1, out);
            }
        }
        LogicalPlan::Limit { n, input } => {
            out.push_str(&format!("{pad}Limit n={n}\n"));
            fmt_plan(input, indent + 1, out);
        }
    }
}

/// Render the lowered plan; two plans with the same routing and shape
/// render identically.
pub fn explain_distributed(plan: &DistributedPlan) -> String {
    let mut s = String::new();
    fmt_node(plan, plan.root(), 0, &mut s);
    s
}

fn fmt_node(plan: &DistributedPlan, id: NodeId, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let Ok(node) = plan.node(id) else {
        out.push_str(&format!("{pad}<missing {id}>\n"));
        return;
    };
    match node {
        PlanNode::RemoteScan(scan) => {
            out.push_str(&format!(
                "{pad}RemoteScan target={} tables={:?}\n",
                scan.target, scan.physical_tables
            ));
            out.push_str(&format!("{pad}  sql={}\n", scan.sql));
        }
        PlanNode::Filter(x) => {
            out.push_str(&format!("{pad}Filter {}\n", expr_to_sql(&x.predicate)));
        }
        PlanNode::Project(x) => {
            out.push_str(&format!("{pad}Project\n"));
            for (e, name) in &x.exprs {
                out.push_str(&format!("{pad}  {name} := {}\n", expr_to_sql(e)));
            }
        }
        PlanNode::Union(x) => {
            out.push_str(&format!("{pad}UnionAll branches={}\n", x.inputs.len()));
        }
        PlanNode::Limit(x) => {
            out.push_str(&format!("{pad}Limit n={}\n", x.n));
        }
    }
    for child in node.children() {
        fmt_node(plan, child, indent + 1, out);
    }
}
