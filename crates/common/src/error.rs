use std::time::Duration;

use thiserror::Error;

/// Canonical error taxonomy used across shq crates.
///
/// Classification guidance:
/// - [`ShqError::Planning`], [`ShqError::ShardResolutionEmpty`]: failures while
///   rewriting a plan; the whole compile fails
/// - [`ShqError::DuplicateTargetInTransaction`]: the plan cannot run on the
///   connections bound to the current transaction; nothing was submitted
/// - [`ShqError::FetchTimeout`], [`ShqError::Fetch`], [`ShqError::Cancelled`]:
///   surfaced on the first pull of a remote scan and propagated to the
///   consumer of the row iterator
/// - [`ShqError::InvalidConfig`]: catalog/config contract violations
/// - [`ShqError::Unsupported`]: valid request for a shape not implemented
#[derive(Debug, Error)]
pub enum ShqError {
    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Query planning/rewrite failures.
    ///
    /// Examples:
    /// - unknown table or column
    /// - logical table scan left unresolved after the rewrite pipeline
    #[error("planning error: {0}")]
    Planning(String),

    /// The shard resolver pruned a sharded table down to zero locations.
    #[error("no shard location can answer the predicate for table {table}")]
    ShardResolutionEmpty {
        /// Logical table name.
        table: String,
    },

    /// More than one remote scan targets the same backend inside one transaction.
    #[error(
        "plan fetches from target {target} {scans} times; a transaction connection serves one scan per execution"
    )]
    DuplicateTargetInTransaction {
        /// Backend target name.
        target: String,
        /// Number of scans grouped under the target.
        scans: usize,
    },

    /// Transaction-bound fetch did not resolve within its bound.
    #[error("fetch from target {target} timed out after {timeout:?}")]
    FetchTimeout {
        /// Backend target name.
        target: String,
        /// Configured wait bound.
        timeout: Duration,
    },

    /// Backend query execution failed (network, SQL error, aborted job).
    #[error("fetch from target {target} failed: {message}")]
    Fetch {
        /// Backend target name.
        target: String,
        /// Backend-provided failure description.
        message: String,
    },

    /// The execution observed its cancellation flag.
    #[error("query cancelled")]
    Cancelled,

    /// Runtime failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ShqError {
    /// Whether the caller may retry the whole statement.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShqError::FetchTimeout { .. })
    }

    /// Whether this error terminated an execution because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ShqError::Cancelled)
    }

    /// Whether this error was raised by the rewrite pipeline.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            ShqError::Planning(_) | ShqError::ShardResolutionEmpty { .. }
        )
    }
}

/// Standard shq result alias.
pub type Result<T> = std::result::Result<T, ShqError>;
