//! Fan-out of a distributed plan's remote scans to backend connections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use shq_common::{EngineConfig, Result, ShqError};
use shq_planner::{DistributedPlan, NodeId, RemoteScanExec};
use tracing::{debug, info};

use crate::connection::SharedConnection;
use crate::context::TransactionContext;
use crate::fetch::FetchExecutor;
use crate::lazy::{FetchWait, LazyRowSequence, ScanSlots};

/// One remote scan paired with the connection it will run on.
struct Assignment<'a> {
    id: NodeId,
    scan: &'a RemoteScanExec,
    conn: SharedConnection,
}

/// Binds every unbound remote scan of a plan to a submitted fetch job.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    executor: FetchExecutor,
    transaction_fetch_timeout: Duration,
}

impl Dispatcher {
    /// Dispatcher submitting to `executor`; in-transaction fetches wait at
    /// most `transaction_fetch_timeout` on first pull.
    pub fn new(executor: FetchExecutor, transaction_fetch_timeout: Duration) -> Self {
        Self {
            executor,
            transaction_fetch_timeout,
        }
    }

    /// Dispatcher sized from engine configuration.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            FetchExecutor::new(cfg.fetch_parallelism),
            cfg.transaction_fetch_timeout(),
        )
    }

    /// Submit one fetch job per remote scan whose slot is still empty and
    /// bind the resulting lazy sequences into `slots`.
    ///
    /// Steps:
    /// 1. classify unbound scans by target (ordered by target name);
    /// 2. resolve connections: inside a transaction every target must have
    ///    exactly one scan and uses the connection bound to the
    ///    transaction; in autocommit all connections come from one batched
    ///    pool request and are held in `slots` for this execution;
    /// 3. submit every job, then return; nothing is awaited here.
    ///
    /// Returns the number of submitted jobs. On
    /// [`ShqError::DuplicateTargetInTransaction`] nothing was acquired or
    /// submitted.
    pub async fn fork(
        &self,
        tx: &TransactionContext,
        plan: &DistributedPlan,
        slots: &mut ScanSlots,
    ) -> Result<usize> {
        let mut groups: BTreeMap<String, Vec<(NodeId, &RemoteScanExec)>> = BTreeMap::new();
        for (id, scan) in plan.remote_scans() {
            if slots.is_bound(id) {
                continue;
            }
            groups.entry(scan.target.clone()).or_default().push((id, scan));
        }
        if groups.is_empty() {
            return Ok(0);
        }

        let in_transaction = tx.is_in_transaction();
        let assignments = if in_transaction {
            assign_transaction(tx, groups).await?
        } else {
            let (assignments, owned) = assign_autocommit(tx, groups).await?;
            for conn in owned {
                slots.hold(conn);
            }
            assignments
        };

        // Assignments are final from here on: fan out.
        let (wait, mode) = if in_transaction {
            (FetchWait::Bounded(self.transaction_fetch_timeout), "transaction")
        } else {
            (FetchWait::Unbounded, "autocommit")
        };
        let cancel = tx.cancel_token();
        let submitted = assignments.len();
        for Assignment { id, scan, conn } in assignments {
            let handle = self
                .executor
                .submit(conn, scan.sql.clone(), Arc::clone(&scan.schema), mode);
            let seq = LazyRowSequence::new(Arc::clone(&scan.schema), handle, wait, cancel.clone());
            debug!(
                session_id = %tx.session_id(),
                node = %id,
                backend = %seq.target(),
                wait = ?seq.wait(),
                tables = ?scan.physical_tables,
                "fetch job submitted"
            );
            slots.bind(id, seq)?;
        }
        info!(
            session_id = %tx.session_id(),
            mode,
            jobs = submitted,
            parallelism = self.executor.parallelism(),
            "plan dispatched"
        );
        Ok(submitted)
    }
}

async fn assign_transaction<'a>(
    tx: &TransactionContext,
    groups: BTreeMap<String, Vec<(NodeId, &'a RemoteScanExec)>>,
) -> Result<Vec<Assignment<'a>>> {
    if let Some((target, scans)) = groups.iter().find(|(_, scans)| scans.len() > 1) {
        return Err(ShqError::DuplicateTargetInTransaction {
            target: target.clone(),
            scans: scans.len(),
        });
    }
    let mut out = Vec::with_capacity(groups.len());
    for (target, scans) in groups {
        let conn = tx.bound_connection(&target).await?;
        for (id, scan) in scans {
            out.push(Assignment {
                id,
                scan,
                conn: Arc::clone(&conn),
            });
        }
    }
    Ok(out)
}

/// Returns the assignments plus every connection acquired for them (surplus
/// included), all owned by the execution being dispatched.
async fn assign_autocommit<'a>(
    tx: &TransactionContext,
    groups: BTreeMap<String, Vec<(NodeId, &'a RemoteScanExec)>>,
) -> Result<(Vec<Assignment<'a>>, Vec<SharedConnection>)> {
    let targets = groups
        .iter()
        .flat_map(|(target, scans)| std::iter::repeat(target.clone()).take(scans.len()))
        .collect::<Vec<_>>();
    let mut acquired = tx.pool().acquire_connections(&targets).await?;

    let mut out = Vec::with_capacity(targets.len());
    let mut owned = Vec::with_capacity(targets.len());
    let mut missing = None;
    for (target, scans) in groups {
        for (id, scan) in scans {
            match acquired.get_mut(&target).and_then(|q| q.pop_front()) {
                Some(conn) => {
                    owned.push(Arc::clone(&conn));
                    out.push(Assignment { id, scan, conn });
                }
                None => {
                    missing.get_or_insert_with(|| target.clone());
                }
            }
        }
    }
    owned.extend(acquired.into_values().flatten());
    match missing {
        Some(target) => {
            // Nothing was submitted; the session sweeps these at teardown.
            for conn in owned {
                tx.register_for_close(conn);
            }
            Err(ShqError::Execution(format!(
                "pool returned too few connections for target {target}"
            )))
        }
        None => Ok((out, owned)),
    }
}
