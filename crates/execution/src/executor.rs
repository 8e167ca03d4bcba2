//! Binds a dispatched plan into a pull-based row iterator.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arrow_schema::SchemaRef;
use futures::{future, Stream, StreamExt};
use shq_common::{Result, Row, ShqError};
use shq_planner::{DistributedPlan, NodeId, PlanNode};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::SharedConnection;
use crate::context::{close_all, TransactionContext};
use crate::expressions::{compile_expr, is_true};
use crate::lazy::ScanSlots;
use crate::stream::{RowStreamAdapter, SendableRowStream};

/// Bind `plan` into a [`RowIterator`].
///
/// Every remote scan must already carry a lazy sequence in `slots`; binding
/// consumes them, along with the transient connections the slots hold for
/// this execution. No backend is waited on here. Connections still open
/// when the iterator is dropped without [`RowIterator::close`] go to
/// `release` for the session teardown sweep.
pub fn run(
    plan: &DistributedPlan,
    slots: &mut ScanSlots,
    cancel: CancellationToken,
    release: Option<Arc<TransactionContext>>,
) -> Result<RowIterator> {
    let stream = bind(plan, plan.root(), slots)?;
    Ok(RowIterator {
        schema: plan.schema(),
        stream: Some(stream),
        cancel,
        connections: slots.take_connections(),
        release,
        failed: false,
    })
}

fn bind(plan: &DistributedPlan, id: NodeId, slots: &mut ScanSlots) -> Result<SendableRowStream> {
    let schema = plan.node_schema(id)?;
    match plan.node(id)? {
        PlanNode::RemoteScan(_) => Ok(slots.take(id)?.into_stream()),
        PlanNode::Union(x) => {
            let branches = x
                .inputs
                .iter()
                .map(|input| bind(plan, *input, slots))
                .collect::<Result<Vec<_>>>()?;
            // Branches are drained one after another, in plan order.
            let inner = futures::stream::iter(branches).flatten();
            Ok(adapt(schema, inner))
        }
        PlanNode::Filter(x) => {
            let input = bind(plan, x.input, slots)?;
            let predicate = compile_expr(&x.predicate, &input.schema())?;
            let inner = input.filter_map(move |item| {
                future::ready(match item {
                    Ok(row) => match predicate.evaluate(&row) {
                        Ok(v) if is_true(&v) => Some(Ok(row)),
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    },
                    Err(e) => Some(Err(e)),
                })
            });
            Ok(adapt(schema, inner))
        }
        PlanNode::Project(x) => {
            let input = bind(plan, x.input, slots)?;
            let exprs = x
                .exprs
                .iter()
                .map(|(e, _)| compile_expr(e, &input.schema()))
                .collect::<Result<Vec<_>>>()?;
            let inner = input.map(move |item| {
                item.and_then(|row| exprs.iter().map(|e| e.evaluate(&row)).collect::<Result<Row>>())
            });
            Ok(adapt(schema, inner))
        }
        PlanNode::Limit(x) => {
            let input = bind(plan, x.input, slots)?;
            Ok(adapt(schema, input.take(x.n)))
        }
    }
}

fn adapt<S>(schema: SchemaRef, inner: S) -> SendableRowStream
where
    S: Stream<Item = Result<Row>> + Send + 'static,
{
    Box::pin(RowStreamAdapter::new(schema, Box::pin(inner)))
}

/// Pull-based iterator over a plan's output rows.
///
/// Every pull checks the statement's cancellation token first. After an
/// error the iterator is terminal.
pub struct RowIterator {
    schema: SchemaRef,
    stream: Option<SendableRowStream>,
    cancel: CancellationToken,
    /// Transient connections owned by this execution.
    connections: Vec<SharedConnection>,
    release: Option<Arc<TransactionContext>>,
    failed: bool,
}

impl std::fmt::Debug for RowIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowIterator")
            .field("columns", &self.column_names())
            .field("open", &self.stream.is_some())
            .field("connections", &self.connections.len())
            .field("failed", &self.failed)
            .finish()
    }
}

impl RowIterator {
    /// Declared output row type.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Output column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Next row, or `None` once every branch is drained.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.cancel.is_cancelled() {
            return Err(ShqError::Cancelled);
        }
        if self.failed {
            return Err(ShqError::Execution(
                "row iterator already failed".to_string(),
            ));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ShqError::Cancelled),
            item = stream.next() => item,
        };
        match item {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => {
                self.failed = true;
                Err(e)
            }
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    /// Drain the remaining rows.
    pub async fn collect(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close every delegate stream (aborting fetch jobs not yet resolved)
    /// and release the transient connections of this execution. Other
    /// executions of the same session are not affected.
    pub async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!("row iterator closed before exhaustion");
        }
        close_all(std::mem::take(&mut self.connections)).await
    }
}

impl Drop for RowIterator {
    fn drop(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        let conns = std::mem::take(&mut self.connections);
        match &self.release {
            Some(tx) => {
                for conn in conns {
                    tx.register_for_close(conn);
                }
            }
            None => debug!(connections = conns.len(), "row iterator dropped with open connections"),
        }
    }
}

impl Stream for RowIterator {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.failed {
            return Poll::Ready(None);
        }
        if self.cancel.is_cancelled() {
            // Reported once; the stream then ends.
            self.failed = true;
            return Poll::Ready(Some(Err(ShqError::Cancelled)));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Poll::Ready(None);
        };
        match stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.failed = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.stream = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
