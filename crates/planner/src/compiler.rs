//! Plan compiler: logical plan over logical tables to a distributed plan.

use std::sync::Arc;

use shq_common::{global_metrics, EngineConfig, Result, ShqError};
use tracing::{debug, error};

use crate::catalog::ShardResolver;
use crate::logical_plan::LogicalPlan;
use crate::normalize::{absorb_scan_predicates, pull_up_unions};
use crate::physical_plan::DistributedPlan;
use crate::physical_planner::create_distributed_plan;
use crate::push_down::PushDownLogicalTable;
use crate::rewriter::RuleDriver;
use crate::sql_frontend::sql_to_query;
use crate::sql_pushdown::push_down_by_sql;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Upper bound on rewrite rule applications per compile.
    pub match_limit: usize,
    /// Copy `LIMIT` into remote statements.
    pub push_down_limit: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for CompilerConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            match_limit: cfg.rewrite_match_limit,
            push_down_limit: cfg.push_down_limit,
        }
    }
}

/// Runs the rewrite pipeline against one shard resolver.
///
/// Pipeline (strict order):
/// 1. absorb filters/projections sitting directly on table scans;
/// 2. eliminate logical tables (push-down rewrite, bounded fixed point);
/// 3. pull up unions;
/// 4. push down by SQL, honoring `for_update`;
/// 5. lower into the [`DistributedPlan`] arena.
pub struct PlanCompiler {
    resolver: Arc<dyn ShardResolver>,
    cfg: CompilerConfig,
    driver: RuleDriver,
}

impl std::fmt::Debug for PlanCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCompiler")
            .field("cfg", &self.cfg)
            .field("driver", &self.driver)
            .finish()
    }
}

impl PlanCompiler {
    pub fn new(resolver: Arc<dyn ShardResolver>, cfg: CompilerConfig) -> Self {
        let driver = RuleDriver::new(cfg.match_limit).with_rule(Arc::new(PushDownLogicalTable));
        Self {
            resolver,
            cfg,
            driver,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn ShardResolver> {
        &self.resolver
    }

    /// Compile SQL text; a trailing `FOR UPDATE` also makes it a locking read.
    pub fn try_compile_sql(&self, sql: &str, for_update: bool) -> Result<DistributedPlan> {
        let query = sql_to_query(sql)?;
        self.try_compile(query.plan, for_update || query.for_update)
    }

    pub fn try_compile(&self, plan: LogicalPlan, for_update: bool) -> Result<DistributedPlan> {
        let plan = absorb_scan_predicates(plan)?;
        let plan = self.eliminate_logical_tables(plan)?;
        let plan = pull_up_unions(plan)?;
        let plan = push_down_by_sql(
            plan,
            self.resolver.as_ref(),
            for_update,
            self.cfg.push_down_limit,
        )?;
        let plan = create_distributed_plan(&plan)?;
        debug!(
            for_update,
            nodes = plan.len(),
            remote_scans = plan.remote_scans().len(),
            "plan compiled"
        );
        Ok(plan)
    }

    /// Fail-closed variant of [`PlanCompiler::try_compile_sql`]: errors are
    /// logged and reported as an absent plan.
    pub fn compile_sql(&self, sql: &str, for_update: bool) -> Option<DistributedPlan> {
        fail_closed(self.try_compile_sql(sql, for_update))
    }

    /// Fail-closed variant of [`PlanCompiler::try_compile`].
    pub fn compile(&self, plan: LogicalPlan, for_update: bool) -> Option<DistributedPlan> {
        fail_closed(self.try_compile(plan, for_update))
    }

    /// Rewrite every logical table scan into physical scans.
    ///
    /// Fails if a logical table is still referenced once the rule driver has
    /// spent its match limit.
    pub fn eliminate_logical_tables(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let (plan, applied) = self.driver.run(plan, self.resolver.as_ref())?;
        if let Some(table) = first_logical_scan(&plan, self.resolver.as_ref()) {
            return Err(ShqError::Planning(format!(
                "logical table {table} still referenced after {applied} rewrites (limit {})",
                self.cfg.match_limit
            )));
        }
        Ok(plan)
    }
}

fn first_logical_scan(plan: &LogicalPlan, resolver: &dyn ShardResolver) -> Option<String> {
    match plan {
        LogicalPlan::TableScan { table, .. } => resolver
            .logical_table(table)
            .map(|_| table.clone()),
        other => other
            .children()
            .into_iter()
            .find_map(|c| first_logical_scan(c, resolver)),
    }
}

fn fail_closed(result: Result<DistributedPlan>) -> Option<DistributedPlan> {
    match result {
        Ok(plan) => Some(plan),
        Err(e) => {
            let reason = match &e {
                ShqError::ShardResolutionEmpty { .. } => "shard_resolution_empty",
                ShqError::Unsupported(_) => "unsupported",
                _ => "planning",
            };
            global_metrics().inc_compile_failures(reason);
            error!(error = %e, reason, "plan compilation failed; no plan produced");
            None
        }
    }
}
