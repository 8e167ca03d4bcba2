//! Lazy row sequences and the per-execution slot table holding them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use arrow_schema::SchemaRef;
use futures::StreamExt;
use shq_common::{global_metrics, Result, Row, ShqError};
use shq_planner::NodeId;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::connection::SharedConnection;
use crate::fetch::FetchHandle;
use crate::stream::{RowStreamAdapter, SendableRowStream};

/// How long the first pull may wait for its fetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWait {
    /// Fail with [`ShqError::FetchTimeout`] after the duration.
    Bounded(Duration),
    /// Wait until the job finishes or the statement is cancelled.
    Unbounded,
}

/// Deferred rows of one remote scan, backed by a submitted fetch job.
///
/// Nothing waits on the job until the stream returned by
/// [`LazyRowSequence::into_stream`] is first polled.
#[derive(Debug)]
pub struct LazyRowSequence {
    target: String,
    schema: SchemaRef,
    handle: FetchHandle,
    wait: FetchWait,
    cancel: CancellationToken,
}

enum State {
    Pending(LazyRowSequence),
    Streaming {
        inner: SendableRowStream,
        cancel: CancellationToken,
        target: String,
        rows: u64,
    },
    Cancelled,
    Done,
}

impl LazyRowSequence {
    /// Wrap a submitted job; the sequence reads from the job's target.
    pub fn new(
        schema: SchemaRef,
        handle: FetchHandle,
        wait: FetchWait,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target: handle.target().to_string(),
            schema,
            handle,
            wait,
            cancel,
        }
    }

    /// Backend target of the underlying job.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wait policy for the first pull.
    pub fn wait(&self) -> FetchWait {
        self.wait
    }

    /// Row stream over the job's result.
    ///
    /// The first poll resolves the job; afterwards every poll checks the
    /// cancellation token before touching the backend stream. Once
    /// cancellation is observed every further poll yields
    /// [`ShqError::Cancelled`].
    pub fn into_stream(self) -> SendableRowStream {
        let schema = self.schema.clone();
        let stream = futures::stream::unfold(State::Pending(self), |state| async move {
            match state {
                State::Pending(seq) => {
                    let cancel = seq.cancel.clone();
                    let target = seq.target.clone();
                    match seq.resolve().await {
                        Ok(inner) => next_row(inner, cancel, target, 0).await,
                        Err(ShqError::Cancelled) => {
                            Some((Err(ShqError::Cancelled), State::Cancelled))
                        }
                        Err(e) => Some((Err(e), State::Done)),
                    }
                }
                State::Streaming {
                    inner,
                    cancel,
                    target,
                    rows,
                } => next_row(inner, cancel, target, rows).await,
                State::Cancelled => Some((Err(ShqError::Cancelled), State::Cancelled)),
                State::Done => None,
            }
        });
        Box::pin(RowStreamAdapter::new(schema, Box::pin(stream)))
    }

    async fn resolve(mut self) -> Result<SendableRowStream> {
        let started = Instant::now();
        let cancel = self.cancel.clone();
        let result = {
            let join = self.handle.join();
            match self.wait {
                FetchWait::Bounded(timeout) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ShqError::Cancelled),
                    joined = tokio::time::timeout(timeout, join) => match joined {
                        Ok(result) => result,
                        Err(_) => Err(ShqError::FetchTimeout {
                            target: self.target.clone(),
                            timeout,
                        }),
                    },
                },
                FetchWait::Unbounded => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ShqError::Cancelled),
                    result = join => result,
                },
            }
        };
        global_metrics().observe_fetch_wait(&self.target, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.handle.abort();
            global_metrics().inc_fetch_errors(&self.target, error_kind(e));
            match e {
                ShqError::Cancelled | ShqError::FetchTimeout { .. } => {
                    warn!(backend = %self.target, error = %e, "fetch abandoned")
                }
                _ => warn!(backend = %self.target, error = %e, "fetch failed"),
            }
        }
        result
    }
}

async fn next_row(
    mut inner: SendableRowStream,
    cancel: CancellationToken,
    target: String,
    rows: u64,
) -> Option<(Result<Row>, State)> {
    let item = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            global_metrics().inc_fetch_errors(&target, "cancelled");
            return Some((Err(ShqError::Cancelled), State::Cancelled));
        }
        item = inner.next() => item,
    };
    match item {
        Some(Ok(row)) => Some((
            Ok(row),
            State::Streaming {
                inner,
                cancel,
                target,
                rows: rows + 1,
            },
        )),
        Some(Err(e)) => {
            global_metrics().inc_fetch_errors(&target, error_kind(&e));
            Some((Err(e), State::Done))
        }
        None => {
            global_metrics().add_fetch_rows(&target, rows);
            None
        }
    }
}

fn error_kind(e: &ShqError) -> &'static str {
    match e {
        ShqError::Cancelled => "cancelled",
        ShqError::FetchTimeout { .. } => "timeout",
        _ => "failure",
    }
}

#[derive(Debug)]
enum Slot {
    Ready(LazyRowSequence),
    Consumed,
}

/// Side table of lazy row sequences keyed by remote scan node.
///
/// Each slot is written at most once per execution; reading a slot moves
/// the sequence out. The table also owns the transient connections acquired
/// for this execution until they are handed to its row iterator.
#[derive(Debug, Default)]
pub struct ScanSlots {
    slots: HashMap<NodeId, Slot>,
    connections: Vec<SharedConnection>,
}

impl ScanSlots {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` already received a sequence (consumed or not).
    pub fn is_bound(&self, id: NodeId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Store the sequence of `id`; a slot cannot be written twice.
    pub fn bind(&mut self, id: NodeId, seq: LazyRowSequence) -> Result<()> {
        if self.slots.contains_key(&id) {
            return Err(ShqError::Execution(format!(
                "remote scan {id} already has a row sequence"
            )));
        }
        self.slots.insert(id, Slot::Ready(seq));
        Ok(())
    }

    /// Move the sequence of `id` out, leaving the slot consumed.
    pub fn take(&mut self, id: NodeId) -> Result<LazyRowSequence> {
        match self.slots.insert(id, Slot::Consumed) {
            Some(Slot::Ready(seq)) => Ok(seq),
            Some(Slot::Consumed) => Err(ShqError::Execution(format!(
                "row sequence of remote scan {id} was already consumed"
            ))),
            None => {
                self.slots.remove(&id);
                Err(ShqError::Execution(format!(
                    "remote scan {id} was read before its row sequence was set"
                )))
            }
        }
    }

    /// Number of sequences not yet taken.
    pub fn ready(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    /// Keep a transient connection owned by this execution.
    pub fn hold(&mut self, conn: SharedConnection) {
        self.connections.push(conn);
    }

    /// Number of transient connections owned by this execution.
    pub fn held(&self) -> usize {
        self.connections.len()
    }

    /// Move the owned transient connections out.
    pub fn take_connections(&mut self) -> Vec<SharedConnection> {
        std::mem::take(&mut self.connections)
    }
}
