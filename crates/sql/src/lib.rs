//! SQL text to `sqlparser` statements for the shq front end.

use shq_common::{Result, ShqError};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    let dialect = GenericDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| ShqError::Planning(e.to_string()))
}

/// Parse `sql` and require exactly one statement.
pub fn parse_single_statement(sql: &str) -> Result<Statement> {
    let mut stmts = parse_sql(sql)?;
    match stmts.len() {
        1 => Ok(stmts.remove(0)),
        0 => Err(ShqError::Planning("empty SQL text".to_string())),
        n => Err(ShqError::Unsupported(format!(
            "expected one statement, got {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_is_required() {
        assert!(parse_single_statement("SELECT a FROM t").is_ok());
        assert!(matches!(
            parse_single_statement("SELECT a FROM t; SELECT b FROM u"),
            Err(ShqError::Unsupported(_))
        ));
        assert!(matches!(
            parse_single_statement("SELEC a"),
            Err(ShqError::Planning(_))
        ));
    }
}
