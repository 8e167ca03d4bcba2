#![deny(missing_docs)]

//! Execution layer of the shard query router.
//!
//! Architecture role:
//! - backend connection and pool contracts
//! - transaction/session context
//! - bounded fetch executor and lazy row sequences
//! - dispatcher (fan-out) and plan executor (lazy fan-in)
//!
//! Key modules:
//! - [`connection`]
//! - [`context`]
//! - [`dispatcher`]
//! - [`executor`]
//! - [`expressions`]
//! - [`fetch`]
//! - [`lazy`]
//! - [`runtime`]
//! - [`stream`]

pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod expressions;
pub mod fetch;
pub mod lazy;
pub mod runtime;
pub mod stream;

// Re-export only what you want at the crate root (no globs).
pub use connection::{BackendConnection, ConnectionPool, SharedConnection};
pub use context::TransactionContext;
pub use dispatcher::Dispatcher;
pub use executor::{run, RowIterator};
pub use expressions::{compile_expr, is_true, PhysicalExpr};
pub use fetch::{FetchExecutor, FetchHandle};
pub use lazy::{FetchWait, LazyRowSequence, ScanSlots};
pub use runtime::DistributedRuntime;
pub use stream::{
    bounded_row_channel, empty_stream, rows_stream, RowSender, RowStream, RowStreamAdapter,
    SendableRowStream,
};
