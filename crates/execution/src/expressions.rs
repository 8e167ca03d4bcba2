//! Row-level expression compilation and evaluation.
//!
//! Input contract: planner [`Expr`] trees referencing columns by name.
//! Output contract: each evaluation returns one [`ScalarValue`] for the row.
//! NULL follows SQL three-valued logic.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow_schema::{DataType, SchemaRef};
use shq_common::{Result, Row, ScalarValue, ShqError};
use shq_planner::{expr_data_type, BinaryOp, Expr};

/// Executable expression over a single row.
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for `row`.
    fn evaluate(&self, row: &Row) -> Result<ScalarValue>;
}

/// Compile a planner expression against `input_schema`, resolving column
/// names to positions once.
pub fn compile_expr(expr: &Expr, input_schema: &SchemaRef) -> Result<Arc<dyn PhysicalExpr>> {
    let (dt, _) = expr_data_type(expr, input_schema)?;
    let compiled: Arc<dyn PhysicalExpr> = match expr {
        Expr::Column(name) => {
            let index = input_schema
                .fields()
                .iter()
                .position(|f| f.name() == name)
                .ok_or_else(|| {
                    ShqError::Planning(format!("unknown column in execution: {name}"))
                })?;
            Arc::new(ColumnExpr { index, dt })
        }
        Expr::Literal(v) => Arc::new(LiteralExpr { v: v.clone(), dt }),
        Expr::Not(e) => Arc::new(NotExpr {
            inner: compile_expr(e, input_schema)?,
        }),
        Expr::And(a, b) => Arc::new(BoolBinaryExpr {
            left: compile_expr(a, input_schema)?,
            right: compile_expr(b, input_schema)?,
            op: BoolOp::And,
        }),
        Expr::Or(a, b) => Arc::new(BoolBinaryExpr {
            left: compile_expr(a, input_schema)?,
            right: compile_expr(b, input_schema)?,
            op: BoolOp::Or,
        }),
        Expr::BinaryOp { left, op, right } => Arc::new(BinaryExpr {
            left: compile_expr(left, input_schema)?,
            right: compile_expr(right, input_schema)?,
            op: *op,
            out: dt,
        }),
        Expr::IsNull(e) => Arc::new(IsNullExpr {
            inner: compile_expr(e, input_schema)?,
            negated: false,
        }),
        Expr::IsNotNull(e) => Arc::new(IsNullExpr {
            inner: compile_expr(e, input_schema)?,
            negated: true,
        }),
        Expr::InList {
            expr,
            list,
            negated,
        } => Arc::new(InListExpr {
            inner: compile_expr(expr, input_schema)?,
            list: list
                .iter()
                .map(|e| compile_expr(e, input_schema))
                .collect::<Result<Vec<_>>>()?,
            negated: *negated,
        }),
    };
    Ok(compiled)
}

/// Whether a predicate value keeps its row (only `TRUE` does).
pub fn is_true(v: &ScalarValue) -> bool {
    v.as_bool() == Some(true)
}

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        row.get(self.index).cloned().ok_or_else(|| {
            ShqError::Execution(format!(
                "row has {} values, column index {} is out of range",
                row.len(),
                self.index
            ))
        })
    }
}

struct LiteralExpr {
    v: ScalarValue,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, _row: &Row) -> Result<ScalarValue> {
        Ok(self.v.clone())
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        Ok(match self.inner.evaluate(row)? {
            ScalarValue::Boolean(b) => ScalarValue::Boolean(!b),
            ScalarValue::Null => ScalarValue::Null,
            other => return Err(type_error("NOT", &other)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        let l = as_nullable_bool(self.left.evaluate(row)?)?;
        let r = as_nullable_bool(self.right.evaluate(row)?)?;
        // Kleene logic.
        let out = match self.op {
            BoolOp::And => match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BoolOp::Or => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        };
        Ok(out.map_or(ScalarValue::Null, ScalarValue::Boolean))
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        let l = self.left.evaluate(row)?;
        let r = self.right.evaluate(row)?;
        if l.is_null() || r.is_null() {
            return Ok(ScalarValue::Null);
        }
        if self.op.is_comparison() {
            let ord = l.compare(&r).ok_or_else(|| {
                ShqError::Execution(format!("cannot compare {l:?} with {r:?}"))
            })?;
            let keep = match self.op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(ScalarValue::Boolean(keep));
        }
        arithmetic(self.op, &l, &r)
    }
}

fn arithmetic(op: BinaryOp, l: &ScalarValue, r: &ScalarValue) -> Result<ScalarValue> {
    if let (ScalarValue::Int64(a), ScalarValue::Int64(b), false) =
        (l, r, matches!(op, BinaryOp::Divide))
    {
        let v = match op {
            BinaryOp::Plus => a.checked_add(*b),
            BinaryOp::Minus => a.checked_sub(*b),
            _ => a.checked_mul(*b),
        };
        return v
            .map(ScalarValue::Int64)
            .ok_or_else(|| ShqError::Execution(format!("integer overflow in {a} {} {b}", op.sql_symbol())));
    }
    let a = as_f64(l)?;
    let b = as_f64(r)?;
    Ok(ScalarValue::Float64(match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiply => a * b,
        _ => {
            if b == 0.0 {
                return Err(ShqError::Execution("division by zero".to_string()));
            }
            a / b
        }
    }))
}

struct IsNullExpr {
    inner: Arc<dyn PhysicalExpr>,
    negated: bool,
}

impl PhysicalExpr for IsNullExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        Ok(ScalarValue::Boolean(
            self.inner.evaluate(row)?.is_null() != self.negated,
        ))
    }
}

struct InListExpr {
    inner: Arc<dyn PhysicalExpr>,
    list: Vec<Arc<dyn PhysicalExpr>>,
    negated: bool,
}

impl PhysicalExpr for InListExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &Row) -> Result<ScalarValue> {
        let v = self.inner.evaluate(row)?;
        if v.is_null() {
            return Ok(ScalarValue::Null);
        }
        let mut saw_null = false;
        for item in &self.list {
            let candidate = item.evaluate(row)?;
            if candidate.is_null() {
                saw_null = true;
            } else if v.sql_eq(&candidate) {
                return Ok(ScalarValue::Boolean(!self.negated));
            }
        }
        Ok(if saw_null {
            ScalarValue::Null
        } else {
            ScalarValue::Boolean(self.negated)
        })
    }
}

fn as_nullable_bool(v: ScalarValue) -> Result<Option<bool>> {
    match v {
        ScalarValue::Boolean(b) => Ok(Some(b)),
        ScalarValue::Null => Ok(None),
        other => Err(type_error("boolean operator", &other)),
    }
}

fn as_f64(v: &ScalarValue) -> Result<f64> {
    match v {
        ScalarValue::Int64(i) => Ok(*i as f64),
        ScalarValue::Float64(f) => Ok(*f),
        other => Err(type_error("arithmetic", other)),
    }
}

fn type_error(what: &str, v: &ScalarValue) -> ShqError {
    ShqError::Execution(format!("{what} is not defined for {v:?}"))
}
