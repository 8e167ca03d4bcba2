//! Rendering of plan expressions back into SQL text for backends.

use shq_common::ScalarValue;

use crate::logical_plan::Expr;

/// Render an expression as a SQL fragment.
///
/// Every compound operand is parenthesized, so operator precedence of the
/// backend dialect never changes the meaning.
pub fn expr_to_sql(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => quote_ident(name),
        Expr::Literal(v) => literal_to_sql(v),
        Expr::BinaryOp { left, op, right } => format!(
            "{} {} {}",
            operand_to_sql(left),
            op.sql_symbol(),
            operand_to_sql(right)
        ),
        Expr::And(a, b) => format!("{} AND {}", operand_to_sql(a), operand_to_sql(b)),
        Expr::Or(a, b) => format!("{} OR {}", operand_to_sql(a), operand_to_sql(b)),
        Expr::Not(inner) => format!("NOT {}", operand_to_sql(inner)),
        Expr::IsNull(inner) => format!("{} IS NULL", operand_to_sql(inner)),
        Expr::IsNotNull(inner) => format!("{} IS NOT NULL", operand_to_sql(inner)),
        Expr::InList {
            expr,
            list,
            negated,
        } => format!(
            "{} {}IN ({})",
            operand_to_sql(expr),
            if *negated { "NOT " } else { "" },
            list.iter().map(expr_to_sql).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn operand_to_sql(expr: &Expr) -> String {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => expr_to_sql(expr),
        _ => format!("({})", expr_to_sql(expr)),
    }
}

pub fn literal_to_sql(v: &ScalarValue) -> String {
    match v {
        ScalarValue::Null => "NULL".to_string(),
        ScalarValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        ScalarValue::Int64(i) => i.to_string(),
        // Debug keeps the fractional part (`2.0`), so the literal stays a float.
        ScalarValue::Float64(f) => format!("{f:?}"),
        ScalarValue::Utf8(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Quote an identifier unless it is a plain `[A-Za-z_][A-Za-z0-9_]*` word.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote each dot-separated part of a physical table name.
pub fn quote_table_name(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_plan::BinaryOp;

    #[test]
    fn renders_nested_predicates_with_parentheses() {
        let e = Expr::col("id")
            .eq(Expr::lit(ScalarValue::Int64(3)))
            .and(Expr::Or(
                Box::new(Expr::IsNull(Box::new(Expr::col("note")))),
                Box::new(Expr::col("price").binary(BinaryOp::GtEq, Expr::lit(ScalarValue::Float64(2.0)))),
            ));
        assert_eq!(
            expr_to_sql(&e),
            "(id = 3) AND ((note IS NULL) OR (price >= 2.0))"
        );
    }

    #[test]
    fn escapes_strings_and_identifiers() {
        assert_eq!(
            literal_to_sql(&ScalarValue::Utf8("o'brien".to_string())),
            "'o''brien'"
        );
        assert_eq!(quote_ident("order id"), "\"order id\"");
        assert_eq!(quote_table_name("db_0.orders_1"), "db_0.orders_1");
        let in_list = Expr::InList {
            expr: Box::new(Expr::col("k")),
            list: vec![
                Expr::lit(ScalarValue::Int64(1)),
                Expr::lit(ScalarValue::Int64(2)),
            ],
            negated: true,
        };
        assert_eq!(expr_to_sql(&in_list), "k NOT IN (1, 2)");
    }
}
