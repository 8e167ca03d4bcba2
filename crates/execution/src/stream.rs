//! Row stream abstractions and channel adapters.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow_schema::SchemaRef;
use futures::channel::mpsc;
use futures::Stream;
use shq_common::{Result, Row, ShqError};

/// A stream of rows that also knows its output schema.
pub trait RowStream: Stream<Item = Result<Row>> + Send {
    /// Output schema every yielded row is aligned with.
    fn schema(&self) -> SchemaRef;
}

/// The standard "stream you can return from operators".
pub type SendableRowStream = Pin<Box<dyn RowStream>>;

/// Adapter that attaches a schema to any `Stream<Item = Result<Row>>`.
pub struct RowStreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> RowStreamAdapter<S> {
    /// Create a new schema-attached stream adapter.
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> RowStream for RowStreamAdapter<S>
where
    S: Stream<Item = Result<Row>> + Send + Unpin + 'static,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for RowStreamAdapter<S>
where
    S: Stream<Item = Result<Row>> + Unpin,
{
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create an empty stream.
pub fn empty_stream(schema: SchemaRef) -> SendableRowStream {
    let inner = futures::stream::empty::<Result<Row>>();
    Box::pin(RowStreamAdapter::new(schema, inner))
}

/// Create a stream over rows already in memory.
pub fn rows_stream(schema: SchemaRef, rows: Vec<Row>) -> SendableRowStream {
    let inner = futures::stream::iter(rows.into_iter().map(Ok));
    Box::pin(RowStreamAdapter::new(schema, inner))
}

/// Create a stream backed by a bounded channel.
///
/// Backpressure: when the receiver is slow and the buffer fills up,
/// `sender.send_row(..).await` waits until there is capacity again.
pub fn bounded_row_channel(schema: SchemaRef, capacity: usize) -> (RowSender, SendableRowStream) {
    let (tx, rx) = mpsc::channel::<Result<Row>>(capacity);
    let stream = Box::pin(RowStreamAdapter::new(schema, rx));
    (RowSender { tx }, stream)
}

/// Sender side for [`bounded_row_channel`].
#[derive(Clone)]
pub struct RowSender {
    tx: mpsc::Sender<Result<Row>>,
}

impl RowSender {
    /// Send a row (awaits if the channel buffer is full).
    pub async fn send_row(&mut self, row: Row) -> Result<()> {
        use futures::SinkExt;
        self.tx
            .send(Ok(row))
            .await
            .map_err(|e| ShqError::Execution(format!("row channel closed: {e}")))
    }
}
