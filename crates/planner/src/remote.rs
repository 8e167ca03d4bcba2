//! Single-target remote scans: the SQL text sent to one backend.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use shq_common::Result;

use crate::logical_plan::{conjunction, project_schema, Expr};
use crate::unparse::{expr_to_sql, quote_ident, quote_table_name};

/// One `SELECT` against one physical table.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSelect {
    /// Physical table unique name.
    pub table: String,
    /// Columns selected when no projection was pushed.
    pub columns: Vec<String>,
    pub projection: Option<Vec<(Expr, String)>>,
    pub filters: Vec<Expr>,
    pub limit: Option<usize>,
}

impl RemoteSelect {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            projection: None,
            filters: vec![],
            limit: None,
        }
    }

    fn to_sql(&self, for_update: bool) -> String {
        let select_list = match &self.projection {
            Some(exprs) => exprs
                .iter()
                .map(|(e, name)| match e {
                    Expr::Column(c) if c == name => quote_ident(c),
                    _ => format!("{} AS {}", expr_to_sql(e), quote_ident(name)),
                })
                .collect::<Vec<_>>(),
            None => self.columns.iter().map(|c| quote_ident(c)).collect(),
        };
        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            quote_table_name(&self.table)
        );
        if let Some(pred) = conjunction(self.filters.iter().cloned()) {
            sql.push_str(" WHERE ");
            sql.push_str(&expr_to_sql(&pred));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if for_update {
            sql.push_str(" FOR UPDATE");
        }
        sql
    }
}

/// Union-all of selects that all run on the same backend connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    pub parts: Vec<RemoteSelect>,
    /// Locking read (`SELECT ... FOR UPDATE`).
    pub for_update: bool,
}

impl RemoteQuery {
    pub fn to_sql(&self) -> String {
        match self.parts.as_slice() {
            [single] => single.to_sql(self.for_update),
            parts => parts
                .iter()
                .map(|p| format!("({})", p.to_sql(self.for_update)))
                .collect::<Vec<_>>()
                .join(" UNION ALL "),
        }
    }
}

/// Maximal subtree pushed to one backend target as a single SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScan {
    pub target: String,
    pub query: RemoteQuery,
    /// Row type of the rows the backend returns for `query`.
    pub schema: SchemaRef,
}

impl RemoteScan {
    pub fn new(table: &str, target: impl Into<String>, schema: SchemaRef, for_update: bool) -> Self {
        let columns = schema.fields().iter().map(|f| f.name().clone()).collect();
        Self {
            target: target.into(),
            query: RemoteQuery {
                parts: vec![RemoteSelect::new(table, columns)],
                for_update,
            },
            schema,
        }
    }

    pub fn sql(&self) -> String {
        self.query.to_sql()
    }

    /// Unique names of every physical table this scan reads.
    pub fn physical_tables(&self) -> Vec<&str> {
        self.query.parts.iter().map(|p| p.table.as_str()).collect()
    }

    /// A filter can be pushed while no part has been projected or limited.
    pub fn accepts_filter(&self) -> bool {
        self.query
            .parts
            .iter()
            .all(|p| p.projection.is_none() && p.limit.is_none())
    }

    pub fn accepts_projection(&self) -> bool {
        self.accepts_filter()
    }

    pub fn push_filter(&mut self, predicate: &Expr) {
        for part in &mut self.query.parts {
            part.filters.push(predicate.clone());
        }
    }

    pub fn push_projection(&mut self, exprs: &[(Expr, String)]) -> Result<()> {
        self.schema = project_schema(exprs, &self.schema)?;
        for part in &mut self.query.parts {
            part.projection = Some(exprs.to_vec());
        }
        Ok(())
    }

    /// Cap every part at `n` rows; an existing smaller cap is kept.
    pub fn push_limit(&mut self, n: usize) {
        for part in &mut self.query.parts {
            part.limit = Some(part.limit.map_or(n, |cur| cur.min(n)));
        }
    }

    /// Append the parts of `other`, which must run on the same target.
    pub fn absorb(&mut self, other: RemoteScan) {
        debug_assert_eq!(self.target, other.target);
        self.query.parts.extend(other.query.parts);
        self.query.for_update |= other.query.for_update;
    }

    pub fn schema_ref(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema};
    use shq_common::ScalarValue;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amount", DataType::Float64, true),
        ]))
    }

    #[test]
    fn renders_single_select_with_pushed_clauses() {
        let mut scan = RemoteScan::new("db0.orders_0", "ds0", schema(), false);
        assert_eq!(scan.sql(), "SELECT id, amount FROM db0.orders_0");

        scan.push_filter(&Expr::col("id").eq(Expr::lit(ScalarValue::Int64(7))));
        scan.push_projection(&[(Expr::col("amount"), "amount".to_string())])
            .expect("projection");
        scan.push_limit(10);
        assert_eq!(
            scan.sql(),
            "SELECT amount FROM db0.orders_0 WHERE id = 7 LIMIT 10"
        );
        assert_eq!(scan.schema.fields().len(), 1);
        assert!(!scan.accepts_filter());
    }

    #[test]
    fn same_target_parts_render_as_union_all() {
        let mut a = RemoteScan::new("db0.orders_0", "ds0", schema(), true);
        let b = RemoteScan::new("db0.orders_1", "ds0", schema(), true);
        a.absorb(b);
        assert_eq!(a.physical_tables(), vec!["db0.orders_0", "db0.orders_1"]);
        assert_eq!(
            a.sql(),
            "(SELECT id, amount FROM db0.orders_0 FOR UPDATE) UNION ALL \
             (SELECT id, amount FROM db0.orders_1 FOR UPDATE)"
        );
    }
}
