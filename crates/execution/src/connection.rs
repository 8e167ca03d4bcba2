//! Backend connection and connection pool contracts.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use shq_common::Result;

use crate::stream::SendableRowStream;

/// One session on one backend target.
///
/// A connection serves one query at a time; callers never run two fetches
/// on the same connection concurrently.
#[async_trait]
pub trait BackendConnection: Send + Sync + fmt::Debug {
    /// Backend target this connection belongs to.
    fn target(&self) -> &str;

    /// Run `sql` and stream its rows, aligned with `schema`.
    async fn execute_query(&self, sql: &str, schema: SchemaRef) -> Result<SendableRowStream>;

    /// Release the connection back to its pool.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a backend connection.
pub type SharedConnection = Arc<dyn BackendConnection>;

/// Source of transient backend connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Acquire one connection per entry of `targets` in one batch.
    ///
    /// `targets` may repeat a name; the returned queue for that name then
    /// holds as many connections as it occurs.
    async fn acquire_connections(
        &self,
        targets: &[String],
    ) -> Result<HashMap<String, VecDeque<SharedConnection>>>;
}
