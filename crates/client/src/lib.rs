//! Embedding facade for the shard query router.
//!
//! An [`Engine`] pairs a shard resolver (usually a
//! [`shq_catalog::ShardCatalog`]) with a backend connection pool. Sessions
//! opened from it compile SQL over logical tables and stream the rows
//! returned by the backends.

mod engine;
mod memory;
mod session;

pub use engine::Engine;
pub use memory::{MemTable, MemoryBackend};
pub use session::Session;
pub use shq_execution::RowIterator;
