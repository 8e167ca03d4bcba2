use shq_common::{Result, ScalarValue, ShqError};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Expr as SqlExpr, GroupByExpr, Ident, LockType, ObjectName,
    Query, Select, SelectItem, SetExpr, SetOperator, SetQuantifier, Statement, TableFactor,
    TableWithJoins, UnaryOperator, Value,
};

use crate::logical_plan::{BinaryOp, Expr, LogicalPlan};

/// A parsed `SELECT` and whether it asked for a locking read.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub plan: LogicalPlan,
    pub for_update: bool,
}

/// Convert a SQL string into a LogicalPlan over (possibly logical) tables.
pub fn sql_to_logical(sql: &str) -> Result<LogicalPlan> {
    Ok(sql_to_query(sql)?.plan)
}

/// Like [`sql_to_logical`], also reporting a trailing `FOR UPDATE`.
pub fn sql_to_query(sql: &str) -> Result<SqlQuery> {
    let stmt = shq_sql::parse_single_statement(sql)?;
    statement_to_query(&stmt)
}

pub fn statement_to_query(stmt: &Statement) -> Result<SqlQuery> {
    match stmt {
        Statement::Query(q) => Ok(SqlQuery {
            plan: query_to_logical(q)?,
            for_update: is_for_update(q),
        }),
        _ => Err(ShqError::Unsupported(
            "only SELECT queries are supported".to_string(),
        )),
    }
}

fn is_for_update(q: &Query) -> bool {
    q.locks.iter().any(|l| matches!(l.lock_type, LockType::Update))
}

fn query_to_logical(q: &Query) -> Result<LogicalPlan> {
    if q.order_by.is_some() {
        return Err(ShqError::Unsupported("ORDER BY is not supported".to_string()));
    }
    if q.offset.is_some() {
        return Err(ShqError::Unsupported("OFFSET is not supported".to_string()));
    }
    let mut plan = set_expr_to_logical(&q.body)?;

    // LIMIT
    if let Some(limit_expr) = &q.limit {
        plan = LogicalPlan::Limit {
            n: sql_limit_to_usize(limit_expr)?,
            input: Box::new(plan),
        };
    }
    Ok(plan)
}

fn set_expr_to_logical(body: &SetExpr) -> Result<LogicalPlan> {
    match body {
        SetExpr::Select(s) => select_to_logical(s),
        SetExpr::Query(q) => query_to_logical(q),
        SetExpr::SetOperation {
            op: SetOperator::Union,
            set_quantifier: SetQuantifier::All,
            left,
            right,
        } => {
            let mut inputs = Vec::new();
            for side in [left, right] {
                match set_expr_to_logical(side)? {
                    LogicalPlan::Union { inputs: branches } => inputs.extend(branches),
                    other => inputs.push(other),
                }
            }
            Ok(LogicalPlan::Union { inputs })
        }
        SetExpr::SetOperation { op, .. } => Err(ShqError::Unsupported(format!(
            "only UNION ALL is supported, got {op}"
        ))),
        other => Err(ShqError::Unsupported(format!(
            "unsupported query body: {other}"
        ))),
    }
}

fn select_to_logical(select: &Select) -> Result<LogicalPlan> {
    if select.distinct.is_some() {
        return Err(ShqError::Unsupported("DISTINCT is not supported".to_string()));
    }
    if !matches!(&select.group_by, GroupByExpr::Expressions(es, _) if es.is_empty())
        || select.having.is_some()
    {
        return Err(ShqError::Unsupported(
            "aggregation is not supported".to_string(),
        ));
    }

    // FROM
    let mut plan = from_to_plan(&select.from)?;

    // WHERE
    if let Some(selection) = &select.selection {
        plan = LogicalPlan::Filter {
            predicate: sql_expr_to_expr(selection)?,
            input: Box::new(plan),
        };
    }

    // SELECT list; a lone `*` keeps the table's columns.
    if let [SelectItem::Wildcard(_)] = select.projection.as_slice() {
        return Ok(plan);
    }
    let mut proj_exprs = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(e) => {
                let expr = sql_expr_to_expr(e)?;
                let name = match &expr {
                    Expr::Column(c) => c.clone(),
                    _ => e.to_string(),
                };
                proj_exprs.push((expr, name));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                proj_exprs.push((sql_expr_to_expr(expr)?, alias.value.clone()));
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                return Err(ShqError::Unsupported(
                    "`*` cannot be mixed with other select items".to_string(),
                ))
            }
        }
    }
    Ok(LogicalPlan::Projection {
        exprs: proj_exprs,
        input: Box::new(plan),
    })
}

fn from_to_plan(from: &[TableWithJoins]) -> Result<LogicalPlan> {
    let [twj] = from else {
        return Err(ShqError::Unsupported(
            "exactly one FROM source is supported".to_string(),
        ));
    };
    if !twj.joins.is_empty() {
        return Err(ShqError::Unsupported("joins are not supported".to_string()));
    }
    match &twj.relation {
        TableFactor::Table { name, .. } => Ok(LogicalPlan::scan(object_name_to_string(name))),
        _ => Err(ShqError::Unsupported(
            "only simple table names in FROM are supported".to_string(),
        )),
    }
}

fn sql_expr_to_expr(e: &SqlExpr) -> Result<Expr> {
    match e {
        SqlExpr::Identifier(id) => Ok(Expr::Column(id.value.clone())),
        SqlExpr::CompoundIdentifier(parts) => Ok(Expr::Column(compound_ident_to_string(parts))),
        SqlExpr::Value(v) => sql_value_to_literal(v),
        SqlExpr::Nested(inner) => sql_expr_to_expr(inner),
        SqlExpr::BinaryOp { left, op, right } => {
            // AND/OR are represented as BinaryOp too
            if *op == SqlBinaryOp::And {
                return Ok(Expr::And(
                    Box::new(sql_expr_to_expr(left)?),
                    Box::new(sql_expr_to_expr(right)?),
                ));
            }
            if *op == SqlBinaryOp::Or {
                return Ok(Expr::Or(
                    Box::new(sql_expr_to_expr(left)?),
                    Box::new(sql_expr_to_expr(right)?),
                ));
            }
            Ok(Expr::BinaryOp {
                left: Box::new(sql_expr_to_expr(left)?),
                op: sql_binop_to_binop(op)?,
                right: Box::new(sql_expr_to_expr(right)?),
            })
        }
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => Ok(Expr::Not(Box::new(sql_expr_to_expr(expr)?))),
            UnaryOperator::Minus => match sql_expr_to_expr(expr)? {
                Expr::Literal(ScalarValue::Int64(i)) => Ok(Expr::lit(ScalarValue::Int64(-i))),
                Expr::Literal(ScalarValue::Float64(f)) => Ok(Expr::lit(ScalarValue::Float64(-f))),
                other => Ok(Expr::lit(ScalarValue::Int64(0)).binary(BinaryOp::Minus, other)),
            },
            UnaryOperator::Plus => sql_expr_to_expr(expr),
            _ => Err(ShqError::Unsupported(format!("unsupported unary op: {op}"))),
        },
        SqlExpr::IsNull(inner) => Ok(Expr::IsNull(Box::new(sql_expr_to_expr(inner)?))),
        SqlExpr::IsNotNull(inner) => Ok(Expr::IsNotNull(Box::new(sql_expr_to_expr(inner)?))),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: Box::new(sql_expr_to_expr(expr)?),
            list: list.iter().map(sql_expr_to_expr).collect::<Result<_>>()?,
            negated: *negated,
        }),
        _ => Err(ShqError::Unsupported(format!(
            "unsupported SQL expression: {e}"
        ))),
    }
}

fn sql_value_to_literal(v: &Value) -> Result<Expr> {
    match v {
        Value::Number(s, _) => {
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Expr::lit(ScalarValue::Int64(i)));
            }
            let f: f64 = s
                .parse()
                .map_err(|_| ShqError::Planning(format!("bad number: {s}")))?;
            Ok(Expr::lit(ScalarValue::Float64(f)))
        }
        Value::SingleQuotedString(s) => Ok(Expr::lit(ScalarValue::Utf8(s.clone()))),
        Value::Boolean(b) => Ok(Expr::lit(ScalarValue::Boolean(*b))),
        Value::Null => Ok(Expr::lit(ScalarValue::Null)),
        _ => Err(ShqError::Unsupported(format!(
            "unsupported SQL literal: {v}"
        ))),
    }
}

fn sql_limit_to_usize(e: &SqlExpr) -> Result<usize> {
    match sql_expr_to_expr(e)? {
        Expr::Literal(ScalarValue::Int64(i)) => usize::try_from(i)
            .map_err(|_| ShqError::Planning("LIMIT must be non-negative".to_string())),
        _ => Err(ShqError::Planning(
            "LIMIT must be a literal integer".to_string(),
        )),
    }
}

fn sql_binop_to_binop(op: &SqlBinaryOp) -> Result<BinaryOp> {
    Ok(match op {
        SqlBinaryOp::Eq => BinaryOp::Eq,
        SqlBinaryOp::NotEq => BinaryOp::NotEq,
        SqlBinaryOp::Lt => BinaryOp::Lt,
        SqlBinaryOp::LtEq => BinaryOp::LtEq,
        SqlBinaryOp::Gt => BinaryOp::Gt,
        SqlBinaryOp::GtEq => BinaryOp::GtEq,
        SqlBinaryOp::Plus => BinaryOp::Plus,
        SqlBinaryOp::Minus => BinaryOp::Minus,
        SqlBinaryOp::Multiply => BinaryOp::Multiply,
        SqlBinaryOp::Divide => BinaryOp::Divide,
        _ => {
            return Err(ShqError::Unsupported(format!(
                "unsupported binary operator: {op}"
            )))
        }
    })
}

fn object_name_to_string(n: &ObjectName) -> String {
    compound_ident_to_string(&n.0)
}

fn compound_ident_to_string(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}
