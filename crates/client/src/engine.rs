use std::sync::Arc;

use shq_common::{global_metrics, EngineConfig, Result};
use shq_execution::{ConnectionPool, DistributedRuntime};
use shq_planner::{CompilerConfig, PlanCompiler, ShardResolver};
use tracing::info;

use crate::session::Session;

pub(crate) struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) compiler: PlanCompiler,
    pub(crate) runtime: DistributedRuntime,
    pub(crate) pool: Arc<dyn ConnectionPool>,
}

/// Shared entry point: one compiler and runtime, any number of sessions.
#[derive(Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.state.config)
            .finish()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn ShardResolver>,
        pool: Arc<dyn ConnectionPool>,
    ) -> Result<Self> {
        config.validate()?;
        let compiler = PlanCompiler::new(resolver, CompilerConfig::from(&config));
        let runtime = DistributedRuntime::new(&config);
        info!(
            fetch_parallelism = config.fetch_parallelism,
            transaction_fetch_timeout_ms = config.transaction_fetch_timeout_ms,
            "engine started"
        );
        Ok(Self {
            state: Arc::new(EngineState {
                config,
                compiler,
                runtime,
                pool,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    /// Open a session in autocommit mode.
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.state))
    }

    pub fn prometheus_metrics(&self) -> String {
        global_metrics().render_prometheus()
    }
}
