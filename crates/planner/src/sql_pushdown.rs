//! Collapse single-target subtrees of a physical plan into remote SQL scans.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use shq_common::Result;
use tracing::debug;

use crate::catalog::{LogicalTable, ShardResolver, TableKind};
use crate::logical_plan::{LogicalPlan, PhysicalScan};
use crate::remote::RemoteScan;

/// Turn every `PhysicalScan` into a [`RemoteScan`] and fold as much of the
/// surrounding plan into its SQL as one backend statement can express.
///
/// With `for_update` every generated statement is a locking read and global
/// tables are routed to their primary replica. `push_down_limit` controls
/// whether `LIMIT` is copied into remote statements.
pub fn push_down_by_sql(
    plan: LogicalPlan,
    resolver: &dyn ShardResolver,
    for_update: bool,
    push_down_limit: bool,
) -> Result<LogicalPlan> {
    plan.transform_up(&mut |node| match node {
        LogicalPlan::PhysicalScan(scan) => to_remote(scan, resolver, for_update),
        LogicalPlan::Filter { predicate, input } => Ok(match *input {
            LogicalPlan::RemoteScan(mut remote) if remote.accepts_filter() => {
                remote.push_filter(&predicate);
                LogicalPlan::RemoteScan(remote)
            }
            other => LogicalPlan::Filter {
                predicate,
                input: Box::new(other),
            },
        }),
        LogicalPlan::Projection { exprs, input } => match *input {
            LogicalPlan::RemoteScan(mut remote) if remote.accepts_projection() => {
                remote.push_projection(&exprs)?;
                Ok(LogicalPlan::RemoteScan(remote))
            }
            other => Ok(LogicalPlan::Projection {
                exprs,
                input: Box::new(other),
            }),
        },
        LogicalPlan::Limit { n, input } if push_down_limit => Ok(push_limit(n, *input)),
        LogicalPlan::Union { inputs } => Ok(merge_union(inputs)),
        other => Ok(other),
    })
}

fn to_remote(
    scan: PhysicalScan,
    resolver: &dyn ShardResolver,
    for_update: bool,
) -> Result<LogicalPlan> {
    let location = if for_update && scan.kind == TableKind::Global {
        let table = LogicalTable {
            name: scan.logical_table.clone(),
            kind: scan.kind,
            schema: scan.schema.clone(),
        };
        let primary = resolver.resolve_primary_replica(&table)?;
        debug!(
            table = %scan.logical_table,
            backend = %primary.target,
            for_update,
            "locking read routed to primary replica"
        );
        primary
    } else {
        scan.location
    };
    Ok(LogicalPlan::RemoteScan(RemoteScan::new(
        &location.unique_name,
        location.target,
        scan.schema,
        for_update,
    )))
}

fn push_limit(n: usize, input: LogicalPlan) -> LogicalPlan {
    match input {
        LogicalPlan::RemoteScan(mut remote) => {
            let parts = remote.query.parts.len();
            remote.push_limit(n);
            if parts == 1 {
                LogicalPlan::RemoteScan(remote)
            } else {
                LogicalPlan::Limit {
                    n,
                    input: Box::new(LogicalPlan::RemoteScan(remote)),
                }
            }
        }
        LogicalPlan::Union { inputs } => LogicalPlan::Limit {
            n,
            input: Box::new(LogicalPlan::Union {
                inputs: inputs
                    .into_iter()
                    .map(|branch| match branch {
                        LogicalPlan::RemoteScan(mut remote) => {
                            remote.push_limit(n);
                            LogicalPlan::RemoteScan(remote)
                        }
                        other => other,
                    })
                    .collect(),
            }),
        },
        other => LogicalPlan::Limit {
            n,
            input: Box::new(other),
        },
    }
}

/// Merge remote branches that share a target into one scan per target.
///
/// Merged scans come first in target order, followed by the remaining
/// branches in their original order.
fn merge_union(inputs: Vec<LogicalPlan>) -> LogicalPlan {
    let mut by_target: BTreeMap<String, RemoteScan> = BTreeMap::new();
    let mut rest = Vec::new();
    for input in inputs {
        match input {
            LogicalPlan::RemoteScan(scan) => match by_target.entry(scan.target.clone()) {
                Entry::Occupied(mut merged) => merged.get_mut().absorb(scan),
                Entry::Vacant(slot) => {
                    slot.insert(scan);
                }
            },
            other => rest.push(other),
        }
    }
    let mut branches = by_target
        .into_values()
        .map(LogicalPlan::RemoteScan)
        .collect::<Vec<_>>();
    branches.extend(rest);
    if branches.len() == 1 {
        branches.remove(0)
    } else {
        LogicalPlan::Union { inputs: branches }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_plan::Expr;
    use crate::normalize::pull_up_unions;
    use crate::push_down::rewrite_scan;
    use crate::test_support::StaticResolver;
    use shq_common::ScalarValue;

    fn physical_plan(resolver: &StaticResolver, table: &str) -> LogicalPlan {
        let plan = rewrite_scan(&LogicalPlan::scan(table), resolver).expect("rewrite");
        pull_up_unions(plan).expect("pull up")
    }

    fn remote_sqls(plan: &LogicalPlan) -> Vec<(String, String)> {
        match plan {
            LogicalPlan::RemoteScan(r) => vec![(r.target.clone(), r.sql())],
            other => other.children().into_iter().flat_map(remote_sqls).collect(),
        }
    }

    #[test]
    fn same_target_branches_become_one_statement() {
        let resolver = StaticResolver::new()
            .sharded("t", &[("t_0", "ds_a"), ("t_1", "ds_a"), ("t_2", "ds_b")]);
        let plan = LogicalPlan::Filter {
            predicate: Expr::col("id").eq(Expr::lit(ScalarValue::Int64(4))),
            input: Box::new(physical_plan(&resolver, "t")),
        };
        let plan = pull_up_unions(plan).expect("pull up");
        let plan = push_down_by_sql(plan, &resolver, false, true).expect("push down");
        assert_eq!(
            remote_sqls(&plan),
            vec![
                (
                    "ds_a".to_string(),
                    "(SELECT id, amount, note FROM t_0 WHERE id = 4) UNION ALL \
                     (SELECT id, amount, note FROM t_1 WHERE id = 4)"
                        .to_string()
                ),
                (
                    "ds_b".to_string(),
                    "SELECT id, amount, note FROM t_2 WHERE id = 4".to_string()
                ),
            ]
        );
    }

    #[test]
    fn locking_read_of_global_table_goes_to_primary() {
        let resolver =
            StaticResolver::new().global("dict", &[("dict_r0", "ds_a"), ("dict_r1", "ds_b")]);
        let plan = physical_plan(&resolver, "dict");
        let read = push_down_by_sql(plan.clone(), &resolver, false, true).expect("read");
        let locking = push_down_by_sql(plan, &resolver, true, true).expect("locking");
        assert_eq!(remote_sqls(&read)[0].0, "ds_a");
        assert_eq!(
            remote_sqls(&locking),
            vec![(
                "ds_b".to_string(),
                "SELECT id, amount, note FROM dict_r1 FOR UPDATE".to_string()
            )]
        );
    }

    #[test]
    fn limit_is_copied_into_branches_and_kept_above() {
        let resolver = StaticResolver::new().sharded("t", &[("t_0", "ds_a"), ("t_1", "ds_b")]);
        let plan = LogicalPlan::Limit {
            n: 5,
            input: Box::new(physical_plan(&resolver, "t")),
        };
        let plan = push_down_by_sql(plan, &resolver, false, true).expect("push down");
        assert!(matches!(plan, LogicalPlan::Limit { n: 5, .. }));
        assert!(remote_sqls(&plan).iter().all(|(_, sql)| sql.ends_with("LIMIT 5")));

        let plan = LogicalPlan::Limit {
            n: 5,
            input: Box::new(physical_plan(&resolver, "t")),
        };
        let plan = push_down_by_sql(plan, &resolver, false, false).expect("push down");
        assert!(remote_sqls(&plan).iter().all(|(_, sql)| !sql.contains("LIMIT")));
    }

    #[test]
    fn single_part_limit_is_fully_pushed() {
        let resolver = StaticResolver::new().sharded("t", &[("t_0", "ds_a")]);
        let plan = LogicalPlan::Limit {
            n: 2,
            input: Box::new(physical_plan(&resolver, "t")),
        };
        let plan = push_down_by_sql(plan, &resolver, false, true).expect("push down");
        let LogicalPlan::RemoteScan(remote) = plan else {
            panic!("expected a bare remote scan");
        };
        assert_eq!(remote.sql(), "SELECT id, amount, note FROM t_0 LIMIT 2");
    }
}
