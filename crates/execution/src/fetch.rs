//! Bounded worker pool running backend fetch jobs.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use shq_common::{global_metrics, Result, ShqError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::SharedConnection;
use crate::stream::SendableRowStream;

/// Runs one fetch job per remote scan, at most `parallelism` at a time.
///
/// Submission never waits: jobs queue for a slot inside their own task.
#[derive(Debug, Clone)]
pub struct FetchExecutor {
    slots: Arc<Semaphore>,
    parallelism: usize,
}

impl FetchExecutor {
    /// Pool with `parallelism` concurrent jobs (at least one).
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            slots: Arc::new(Semaphore::new(parallelism)),
            parallelism,
        }
    }

    /// Configured job concurrency.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Submit `sql` against `conn`. Must be called inside a tokio runtime.
    ///
    /// `mode` labels the job in metrics (`transaction` or `autocommit`).
    pub fn submit(
        &self,
        conn: SharedConnection,
        sql: String,
        schema: SchemaRef,
        mode: &'static str,
    ) -> FetchHandle {
        let target = conn.target().to_string();
        global_metrics().record_fetch_submitted(&target, mode);
        let slots = Arc::clone(&self.slots);
        let job_target = target.clone();
        let handle = tokio::spawn(async move {
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|e| ShqError::Execution(format!("fetch pool closed: {e}")))?;
            debug!(backend = %job_target, sql = %sql, "fetch job started");
            conn.execute_query(&sql, schema).await
        });
        FetchHandle {
            target,
            handle: Some(handle),
        }
    }
}

/// Pending result of a submitted fetch job.
///
/// Dropping a handle that was never joined aborts the job.
pub struct FetchHandle {
    target: String,
    handle: Option<JoinHandle<Result<SendableRowStream>>>,
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("target", &self.target)
            .field("pending", &self.handle.is_some())
            .finish()
    }
}

impl FetchHandle {
    /// Backend target of the job.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wait for the job's result.
    ///
    /// A job that was aborted or panicked surfaces as [`ShqError::Fetch`].
    pub async fn join(&mut self) -> Result<SendableRowStream> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(ShqError::Execution(format!(
                "fetch job for {} was already resolved",
                self.target
            )));
        };
        let joined = handle.await;
        self.handle = None;
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ShqError::Fetch {
                target: self.target.clone(),
                message: "fetch job aborted".to_string(),
            }),
            Err(e) => Err(ShqError::Fetch {
                target: self.target.clone(),
                message: format!("fetch job failed: {e}"),
            }),
        }
    }

    /// Abort the job if it has not been joined yet.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
