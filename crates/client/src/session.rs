use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shq_common::{QueryId, Result, SessionId, ShqError};
use shq_execution::{RowIterator, TransactionContext};
use shq_planner::{explain_distributed, explain_logical, sql_to_query};
use tracing::{debug, info};

use crate::engine::EngineState;

/// One client session: a transaction context plus statement numbering.
///
/// Sessions start in autocommit mode. Between [`Session::begin`] and
/// [`Session::commit`]/[`Session::rollback`] every statement runs on the
/// connections bound to the transaction, one per backend target.
pub struct Session {
    engine: Arc<EngineState>,
    tx: Arc<TransactionContext>,
    next_query: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("tx", &self.tx).finish()
    }
}

impl Session {
    pub(crate) fn new(engine: Arc<EngineState>) -> Self {
        let tx = TransactionContext::new(SessionId::next(), Arc::clone(&engine.pool));
        Self {
            engine,
            tx: Arc::new(tx),
            next_query: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> SessionId {
        self.tx.session_id()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_in_transaction()
    }

    /// Run a query; a trailing `FOR UPDATE` makes it a locking read.
    pub async fn query(&self, sql: &str) -> Result<RowIterator> {
        self.execute(sql, false).await
    }

    /// Run a query as a locking read: global tables go to their primary
    /// replica and remote statements carry `FOR UPDATE`.
    pub async fn query_for_update(&self, sql: &str) -> Result<RowIterator> {
        self.execute(sql, true).await
    }

    async fn execute(&self, sql: &str, for_update: bool) -> Result<RowIterator> {
        let query_id = QueryId(self.next_query.fetch_add(1, Ordering::Relaxed));
        let plan = self
            .engine
            .compiler
            .compile_sql(sql, for_update)
            .ok_or_else(|| {
                ShqError::Planning(format!("statement {query_id} could not be compiled"))
            })?;
        debug!(
            session_id = %self.id(),
            query_id = %query_id,
            remote_scans = plan.remote_scans().len(),
            "executing statement"
        );
        self.tx.begin_statement();
        self.engine.runtime.execute(&self.tx, &plan).await
    }

    /// Logical and distributed plan of `sql`, without executing it.
    pub fn explain(&self, sql: &str) -> Result<String> {
        let query = sql_to_query(sql)?;
        let logical = explain_logical(&query.plan);
        let plan = self
            .engine
            .compiler
            .try_compile(query.plan, query.for_update)?;
        Ok(format!(
            "logical plan:\n{logical}distributed plan:\n{}",
            explain_distributed(&plan)
        ))
    }

    pub fn begin(&self) -> Result<()> {
        self.tx.begin()
    }

    /// End the transaction. The backends own the outcome of the work done on
    /// the bound connections; closing them is all that happens here.
    pub async fn commit(&self) -> Result<()> {
        self.end("commit").await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.end("rollback").await
    }

    async fn end(&self, how: &str) -> Result<()> {
        if !self.tx.is_in_transaction() {
            return Err(ShqError::Execution(format!(
                "{how} without an open transaction"
            )));
        }
        info!(session_id = %self.id(), how, "ending transaction");
        self.tx.end_transaction().await
    }

    /// Cancel the running statement. Every pending pull fails with
    /// [`ShqError::Cancelled`]; the next statement starts fresh.
    pub fn cancel(&self) {
        self.tx.cancel();
    }

    /// Tear the session down, closing every connection it still holds.
    pub async fn close(&self) -> Result<()> {
        self.tx.close().await
    }
}
