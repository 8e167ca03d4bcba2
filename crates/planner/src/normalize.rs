//! Structural normalization passes run around the push-down rewrite.

use shq_common::Result;

use crate::logical_plan::{split_conjunction, Expr, LogicalPlan};

/// Fold a `Filter`/pure-column `Projection` sitting directly on a table scan
/// into the scan itself so the resolver sees the predicates.
pub fn absorb_scan_predicates(plan: LogicalPlan) -> Result<LogicalPlan> {
    plan.transform_up(&mut |node| {
        Ok(match node {
            LogicalPlan::Filter { predicate, input } => match *input {
                LogicalPlan::TableScan {
                    table,
                    projection,
                    mut filters,
                } => {
                    filters.extend(split_conjunction(&predicate).into_iter().cloned());
                    LogicalPlan::TableScan {
                        table,
                        projection,
                        filters,
                    }
                }
                other => LogicalPlan::Filter {
                    predicate,
                    input: Box::new(other),
                },
            },
            LogicalPlan::Projection { exprs, input } => match *input {
                LogicalPlan::TableScan {
                    table,
                    projection: None,
                    filters,
                } if is_column_projection(&exprs) => LogicalPlan::TableScan {
                    table,
                    projection: Some(exprs.into_iter().map(|(_, name)| name).collect()),
                    filters,
                },
                other => LogicalPlan::Projection {
                    exprs,
                    input: Box::new(other),
                },
            },
            other => other,
        })
    })
}

fn is_column_projection(exprs: &[(Expr, String)]) -> bool {
    exprs
        .iter()
        .all(|(e, name)| matches!(e, Expr::Column(c) if c == name))
}

/// Pull unions towards the root.
///
/// `Filter` and `Projection` over a union are distributed into its branches,
/// nested unions are flattened into their parent and a union with a single
/// branch is replaced by that branch. Branch order is preserved.
pub fn pull_up_unions(plan: LogicalPlan) -> Result<LogicalPlan> {
    plan.transform_up(&mut |node| {
        Ok(match node {
            LogicalPlan::Filter { predicate, input } => match *input {
                LogicalPlan::Union { inputs } => LogicalPlan::Union {
                    inputs: inputs
                        .into_iter()
                        .map(|branch| LogicalPlan::Filter {
                            predicate: predicate.clone(),
                            input: Box::new(branch),
                        })
                        .collect(),
                },
                other => LogicalPlan::Filter {
                    predicate,
                    input: Box::new(other),
                },
            },
            LogicalPlan::Projection { exprs, input } => match *input {
                LogicalPlan::Union { inputs } => LogicalPlan::Union {
                    inputs: inputs
                        .into_iter()
                        .map(|branch| LogicalPlan::Projection {
                            exprs: exprs.clone(),
                            input: Box::new(branch),
                        })
                        .collect(),
                },
                other => LogicalPlan::Projection {
                    exprs,
                    input: Box::new(other),
                },
            },
            LogicalPlan::Union { inputs } => flatten_union(inputs),
            other => other,
        })
    })
}

fn flatten_union(inputs: Vec<LogicalPlan>) -> LogicalPlan {
    let mut flat = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input {
            LogicalPlan::Union { inputs } => flat.extend(inputs),
            other => flat.push(other),
        }
    }
    if flat.len() == 1 {
        flat.remove(0)
    } else {
        LogicalPlan::Union { inputs: flat }
    }
}
