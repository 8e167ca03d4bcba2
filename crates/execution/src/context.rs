//! Per-session transaction state consulted on every execution.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use shq_common::{Result, SessionId, ShqError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionPool, SharedConnection};

struct TxState {
    in_transaction: bool,
    cancel: CancellationToken,
    /// Connections owned by the open transaction, one per target.
    bound: BTreeMap<String, SharedConnection>,
    /// Leftover transient connections to close at teardown.
    pending_close: Vec<SharedConnection>,
}

/// Transaction/session context.
///
/// Tracks whether a transaction is open, the cancellation token shared by
/// every lazy row sequence of the current statement, the connections bound
/// to the transaction, and the transient connections awaiting close.
pub struct TransactionContext {
    session_id: SessionId,
    pool: Arc<dyn ConnectionPool>,
    state: Mutex<TxState>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("transaction state lock poisoned");
        f.debug_struct("TransactionContext")
            .field("session_id", &self.session_id)
            .field("in_transaction", &state.in_transaction)
            .field("bound", &state.bound.keys().collect::<Vec<_>>())
            .field("pending_close", &state.pending_close.len())
            .finish()
    }
}

impl TransactionContext {
    /// Create an autocommit context drawing connections from `pool`.
    pub fn new(session_id: SessionId, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            session_id,
            pool,
            state: Mutex::new(TxState {
                in_transaction: false,
                cancel: CancellationToken::new(),
                bound: BTreeMap::new(),
                pending_close: Vec::new(),
            }),
        }
    }

    /// Owning session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Connection pool used for transient and transaction connections.
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.state.lock().expect("transaction state lock poisoned")
    }

    /// Whether a transaction is open.
    pub fn is_in_transaction(&self) -> bool {
        self.state().in_transaction
    }

    /// Open a transaction. Nested transactions are rejected.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state();
        if state.in_transaction {
            return Err(ShqError::Execution(format!(
                "session {} already has an open transaction",
                self.session_id
            )));
        }
        state.in_transaction = true;
        info!(session_id = %self.session_id, "transaction started");
        Ok(())
    }

    /// End the open transaction and close every connection bound to it.
    pub async fn end_transaction(&self) -> Result<()> {
        let bound = {
            let mut state = self.state();
            state.in_transaction = false;
            std::mem::take(&mut state.bound)
        };
        info!(
            session_id = %self.session_id,
            connections = bound.len(),
            "transaction ended"
        );
        close_all(bound.into_values().collect()).await
    }

    /// Connection bound to `target` for the open transaction, acquired and
    /// bound on first use.
    pub async fn bound_connection(&self, target: &str) -> Result<SharedConnection> {
        if let Some(conn) = self.state().bound.get(target) {
            return Ok(Arc::clone(conn));
        }
        let mut acquired = self
            .pool
            .acquire_connections(&[target.to_string()])
            .await?;
        let conn = acquired
            .get_mut(target)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| {
                ShqError::Execution(format!("pool returned no connection for target {target}"))
            })?;
        debug!(session_id = %self.session_id, backend = %target, "connection bound to transaction");
        let mut state = self.state();
        Ok(Arc::clone(
            state
                .bound
                .entry(target.to_string())
                .or_insert(conn),
        ))
    }

    /// Token of the current statement.
    pub fn cancel_token(&self) -> CancellationToken {
        self.state().cancel.clone()
    }

    /// Token for a new statement: a cancelled token is replaced, since
    /// cancellation is terminal for the execution that observed it.
    pub fn begin_statement(&self) -> CancellationToken {
        let mut state = self.state();
        if state.cancel.is_cancelled() {
            state.cancel = CancellationToken::new();
        }
        state.cancel.clone()
    }

    /// Cancel the current statement.
    pub fn cancel(&self) {
        warn!(session_id = %self.session_id, "statement cancelled");
        self.state().cancel.cancel();
    }

    /// Register a leftover transient connection (its execution ended without
    /// closing it) for close on teardown.
    pub fn register_for_close(&self, conn: SharedConnection) {
        self.state().pending_close.push(conn);
    }

    /// Number of transient connections awaiting close.
    pub fn pending_close_count(&self) -> usize {
        self.state().pending_close.len()
    }

    /// Close every registered transient connection.
    pub async fn close_registered(&self) -> Result<()> {
        let pending = std::mem::take(&mut self.state().pending_close);
        if !pending.is_empty() {
            debug!(
                session_id = %self.session_id,
                connections = pending.len(),
                "closing transient connections"
            );
        }
        close_all(pending).await
    }

    /// Session teardown: cancel, end any transaction and close everything.
    pub async fn close(&self) -> Result<()> {
        self.state().cancel.cancel();
        let ended = self.end_transaction().await;
        let closed = self.close_registered().await;
        ended.and(closed)
    }
}

/// Close every connection; the first failure is returned after all were tried.
pub(crate) async fn close_all(conns: Vec<SharedConnection>) -> Result<()> {
    let mut first_err = None;
    for conn in conns {
        if let Err(e) = conn.close().await {
            warn!(backend = %conn.target(), error = %e, "closing connection failed");
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}
