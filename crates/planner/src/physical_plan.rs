use std::fmt;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use shq_common::{Result, ShqError};

use crate::logical_plan::Expr;
use crate::remote::RemoteQuery;

/// Index of a node inside a [`DistributedPlan`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Executable operator stored in the plan arena.
///
/// Children are referenced by [`NodeId`]; a child always has a smaller id
/// than its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// One SQL statement against one backend target.
    RemoteScan(RemoteScanExec),
    /// Row filter evaluated locally.
    Filter(FilterExec),
    /// Projection evaluated locally.
    Project(ProjectExec),
    /// Union-all, branches drained in order.
    Union(UnionExec),
    /// Limit evaluated locally.
    Limit(LimitExec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScanExec {
    /// Backend/datasource name used for connection lookup.
    pub target: String,
    /// Unique names of the physical tables read by `sql`.
    pub physical_tables: Vec<String>,
    pub query: RemoteQuery,
    /// SQL text sent to the backend.
    pub sql: String,
    /// Row metadata handed to the backend with `sql`.
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterExec {
    pub predicate: Expr,
    pub input: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectExec {
    /// (expr, output_name)
    pub exprs: Vec<(Expr, String)>,
    pub input: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionExec {
    pub inputs: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitExec {
    pub n: usize,
    pub input: NodeId,
}

impl PlanNode {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            PlanNode::RemoteScan(_) => vec![],
            PlanNode::Filter(x) => vec![x.input],
            PlanNode::Project(x) => vec![x.input],
            PlanNode::Limit(x) => vec![x.input],
            PlanNode::Union(x) => x.inputs.clone(),
        }
    }
}

/// Fully physical plan produced by the compiler: an arena of nodes with a
/// root and a per-node output row type.
///
/// The plan itself is immutable after lowering. Per-execution state (the
/// lazy row sequence of each remote scan) lives in a separate slot table
/// keyed by [`NodeId`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedPlan {
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) schemas: Vec<SchemaRef>,
    pub(crate) root: NodeId,
}

impl DistributedPlan {
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Output row type of the whole plan.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schemas[self.root.0])
    }

    pub fn node(&self, id: NodeId) -> Result<&PlanNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ShqError::Execution(format!("plan has no node {id}")))
    }

    pub fn node_schema(&self, id: NodeId) -> Result<SchemaRef> {
        self.schemas
            .get(id.0)
            .cloned()
            .ok_or_else(|| ShqError::Execution(format!("plan has no node {id}")))
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.children())
    }

    /// Every remote scan in pre-order (left-to-right branch order).
    pub fn remote_scans(&self) -> Vec<(NodeId, &RemoteScanExec)> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            if let PlanNode::RemoteScan(scan) = node {
                out.push((id, scan));
            }
            stack.extend(node.children().into_iter().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
