//! Dispatch plus bind: the execution entry point used by sessions.

use std::sync::Arc;

use shq_common::{EngineConfig, Result};
use shq_planner::DistributedPlan;

use crate::context::TransactionContext;
use crate::dispatcher::Dispatcher;
use crate::executor::{run, RowIterator};
use crate::lazy::ScanSlots;

/// Runs distributed plans on behalf of sessions.
#[derive(Debug, Clone)]
pub struct DistributedRuntime {
    dispatcher: Dispatcher,
}

impl DistributedRuntime {
    /// Runtime configured from `cfg`.
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::from_config(cfg),
        }
    }

    /// Runtime over an explicit dispatcher.
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Fork every remote scan of `plan` and bind the plan into a row
    /// iterator. Fetch jobs are running when this returns; rows are pulled
    /// by the caller.
    pub async fn execute(
        &self,
        tx: &Arc<TransactionContext>,
        plan: &DistributedPlan,
    ) -> Result<RowIterator> {
        let mut slots = ScanSlots::new();
        let cancel = tx.cancel_token();
        let rows = match self.dispatcher.fork(tx, plan, &mut slots).await {
            Ok(_) => run(plan, &mut slots, cancel, Some(Arc::clone(tx))),
            Err(e) => Err(e),
        };
        if rows.is_err() {
            // Leftovers of a failed execution go to the session sweep.
            for conn in slots.take_connections() {
                tx.register_for_close(conn);
            }
        }
        rows
    }
}
