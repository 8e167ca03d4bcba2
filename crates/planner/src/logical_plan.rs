use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use shq_common::{Result, ScalarValue, ShqError};

use crate::catalog::{PhysicalTableLocation, TableKind};
use crate::remote::RemoteScan;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(ScalarValue),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn lit(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(right))
    }
}

/// Flatten nested `AND`s into their conjuncts.
pub fn split_conjunction(expr: &Expr) -> Vec<&Expr> {
    fn collect<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
        match expr {
            Expr::And(a, b) => {
                collect(a, out);
                collect(b, out);
            }
            other => out.push(other),
        }
    }
    let mut out = Vec::new();
    collect(expr, &mut out);
    out
}

/// Fold predicates back into a left-deep `AND` chain.
pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(|acc, e| acc.and(e))
}

/// Plan tree handed from the front end to the compiler.
///
/// Leaves move through three stages while compiling: `TableScan` (logical
/// table reference), `PhysicalScan` (one shard/replica location) and
/// `RemoteScan` (SQL text bound to one backend target).
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    TableScan {
        table: String,
        projection: Option<Vec<String>>,
        filters: Vec<Expr>,
    },
    PhysicalScan(PhysicalScan),
    RemoteScan(RemoteScan),
    Projection {
        exprs: Vec<(Expr, String)>,
        input: Box<LogicalPlan>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    /// Union-all: branch rows are concatenated, duplicates kept.
    Union {
        inputs: Vec<LogicalPlan>,
    },
    Limit {
        n: usize,
        input: Box<LogicalPlan>,
    },
}

/// Scan of one physical location of a logical table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalScan {
    pub logical_table: String,
    pub kind: TableKind,
    pub location: PhysicalTableLocation,
    /// Row type of the logical table; every location shares it.
    pub schema: SchemaRef,
}

impl LogicalPlan {
    pub fn scan(table: impl Into<String>) -> LogicalPlan {
        LogicalPlan::TableScan {
            table: table.into(),
            projection: None,
            filters: vec![],
        }
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::TableScan { .. }
            | LogicalPlan::PhysicalScan(_)
            | LogicalPlan::RemoteScan(_) => vec![],
            LogicalPlan::Projection { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Limit { input, .. } => vec![input.as_ref()],
            LogicalPlan::Union { inputs } => inputs.iter().collect(),
        }
    }

    /// Post-order rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
    {
        let rebuilt = match self {
            LogicalPlan::Projection { exprs, input } => LogicalPlan::Projection {
                exprs,
                input: Box::new(input.transform_up(f)?),
            },
            LogicalPlan::Filter { predicate, input } => LogicalPlan::Filter {
                predicate,
                input: Box::new(input.transform_up(f)?),
            },
            LogicalPlan::Limit { n, input } => LogicalPlan::Limit {
                n,
                input: Box::new(input.transform_up(f)?),
            },
            LogicalPlan::Union { inputs } => LogicalPlan::Union {
                inputs: inputs
                    .into_iter()
                    .map(|i| i.transform_up(f))
                    .collect::<Result<Vec<_>>>()?,
            },
            leaf => leaf,
        };
        f(rebuilt)
    }

    /// Whether any logical table reference is still present.
    pub fn has_table_scan(&self) -> bool {
        match self {
            LogicalPlan::TableScan { .. } => true,
            other => other.children().into_iter().any(|c| c.has_table_scan()),
        }
    }

    /// Output row type of this node.
    pub fn schema(&self) -> Result<SchemaRef> {
        match self {
            LogicalPlan::TableScan { table, .. } => Err(ShqError::Planning(format!(
                "table scan of {table} has no row type before it is resolved"
            ))),
            LogicalPlan::PhysicalScan(scan) => Ok(Arc::clone(&scan.schema)),
            LogicalPlan::RemoteScan(scan) => Ok(Arc::clone(&scan.schema)),
            LogicalPlan::Filter { input, .. } | LogicalPlan::Limit { input, .. } => input.schema(),
            LogicalPlan::Projection { exprs, input } => {
                let input_schema = input.schema()?;
                project_schema(exprs, &input_schema)
            }
            LogicalPlan::Union { inputs } => inputs
                .first()
                .ok_or_else(|| ShqError::Planning("union without inputs".to_string()))?
                .schema(),
        }
    }
}

/// Row type produced by evaluating `exprs` over `input`.
pub fn project_schema(exprs: &[(Expr, String)], input: &Schema) -> Result<SchemaRef> {
    let fields = exprs
        .iter()
        .map(|(e, name)| {
            let (dt, nullable) = expr_data_type(e, input)?;
            Ok(Field::new(name, dt, nullable))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// Resolve the output type (and nullability) of `expr` against `schema`.
pub fn expr_data_type(expr: &Expr, schema: &Schema) -> Result<(DataType, bool)> {
    match expr {
        Expr::Column(name) => {
            let idx = schema
                .index_of(name)
                .map_err(|_| ShqError::Planning(format!("unknown column: {name}")))?;
            let field = schema.field(idx);
            Ok((field.data_type().clone(), field.is_nullable()))
        }
        Expr::Literal(v) => Ok((v.data_type().unwrap_or(DataType::Null), v.is_null())),
        Expr::BinaryOp { left, op, right } => {
            let (lt, ln) = expr_data_type(left, schema)?;
            let (rt, rn) = expr_data_type(right, schema)?;
            if op.is_comparison() {
                return Ok((DataType::Boolean, ln || rn));
            }
            let dt = match (op, &lt, &rt) {
                (BinaryOp::Divide, _, _) => DataType::Float64,
                (_, DataType::Int64, DataType::Int64) => DataType::Int64,
                _ => DataType::Float64,
            };
            Ok((dt, ln || rn))
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            let (_, an) = expr_data_type(a, schema)?;
            let (_, bn) = expr_data_type(b, schema)?;
            Ok((DataType::Boolean, an || bn))
        }
        Expr::Not(inner) => {
            let (_, n) = expr_data_type(inner, schema)?;
            Ok((DataType::Boolean, n))
        }
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            expr_data_type(inner, schema)?;
            Ok((DataType::Boolean, false))
        }
        Expr::InList { expr, list, .. } => {
            let (_, n) = expr_data_type(expr, schema)?;
            for item in list {
                expr_data_type(item, schema)?;
            }
            Ok((DataType::Boolean, n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("price", DataType::Float64, true),
        ])
    }

    #[test]
    fn splits_and_rebuilds_conjunctions() {
        let a = Expr::col("id").eq(Expr::lit(ScalarValue::Int64(1)));
        let b = Expr::IsNotNull(Box::new(Expr::col("price")));
        let c = Expr::col("id").binary(BinaryOp::Gt, Expr::lit(ScalarValue::Int64(0)));
        let e = a.clone().and(b.clone()).and(c.clone());
        let parts = split_conjunction(&e);
        assert_eq!(parts, vec![&a, &b, &c]);
        assert_eq!(conjunction(vec![a, b, c]), Some(e));
        assert_eq!(conjunction(Vec::new()), None);
    }

    #[test]
    fn projection_types_follow_expressions() {
        let exprs = vec![
            (Expr::col("id"), "id".to_string()),
            (
                Expr::col("id").binary(BinaryOp::Plus, Expr::lit(ScalarValue::Int64(1))),
                "next_id".to_string(),
            ),
            (
                Expr::col("price").binary(BinaryOp::Gt, Expr::lit(ScalarValue::Float64(2.5))),
                "pricey".to_string(),
            ),
        ];
        let out = project_schema(&exprs, &schema()).expect("schema");
        assert_eq!(out.field(0).data_type(), &DataType::Int64);
        assert_eq!(out.field(1).data_type(), &DataType::Int64);
        assert_eq!(out.field(2).data_type(), &DataType::Boolean);
        assert!(out.field(2).is_nullable());
    }

    #[test]
    fn unknown_column_is_a_planning_error() {
        let err = expr_data_type(&Expr::col("missing"), &schema()).unwrap_err();
        assert!(matches!(err, ShqError::Planning(_)));
    }
}
