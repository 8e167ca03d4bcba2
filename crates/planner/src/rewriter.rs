use std::sync::Arc;

use shq_common::Result;
use tracing::debug;

use crate::catalog::ShardResolver;
use crate::logical_plan::LogicalPlan;

/// Node-local rewrite hook applied by [`RuleDriver`].
pub trait RewriteRule: Send + Sync {
    /// Stable rule name used in logs.
    fn name(&self) -> &str;

    /// Return a replacement subtree, or `Ok(None)` when `node` does not match.
    fn rewrite(
        &self,
        node: &LogicalPlan,
        resolver: &dyn ShardResolver,
    ) -> Result<Option<LogicalPlan>>;
}

/// Bottom-up, fixed-point rule application bounded by a match limit.
///
/// Plans are finite and every rule shipped here replaces a node with one it
/// no longer matches, so the limit only guards against misbehaving custom
/// rules.
pub struct RuleDriver {
    match_limit: usize,
    rules: Vec<Arc<dyn RewriteRule>>,
}

impl std::fmt::Debug for RuleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDriver")
            .field("match_limit", &self.match_limit)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RuleDriver {
    pub fn new(match_limit: usize) -> Self {
        Self {
            match_limit,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn RewriteRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Apply rules until nothing matches or the match limit is spent.
    ///
    /// Returns the rewritten plan and the number of rule applications.
    pub fn run(
        &self,
        plan: LogicalPlan,
        resolver: &dyn ShardResolver,
    ) -> Result<(LogicalPlan, usize)> {
        let mut applied = 0usize;
        let mut plan = plan;
        loop {
            let mut changed = false;
            plan = plan.transform_up(&mut |node| {
                if applied >= self.match_limit {
                    return Ok(node);
                }
                for rule in &self.rules {
                    if let Some(replacement) = rule.rewrite(&node, resolver)? {
                        debug!(rule = rule.name(), applied, "rewrite rule matched");
                        applied += 1;
                        changed = true;
                        return Ok(replacement);
                    }
                }
                Ok(node)
            })?;
            if !changed || applied >= self.match_limit {
                break;
            }
        }
        Ok((plan, applied))
    }
}
