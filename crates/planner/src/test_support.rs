use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use shq_common::{Result, ShqError};

use crate::catalog::{LogicalTable, PhysicalTableLocation, ShardResolver, TableKind};
use crate::logical_plan::Expr;

/// In-memory resolver without pruning. Every table has the row type of
/// [`test_schema`]; the primary replica of a global table is its last one.
#[derive(Debug, Default)]
pub(crate) struct StaticResolver {
    tables: HashMap<String, (TableKind, Vec<PhysicalTableLocation>)>,
}

pub(crate) fn test_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("amount", DataType::Float64, true),
        Field::new("note", DataType::Utf8, true),
    ]))
}

impl StaticResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sharded(self, name: &str, locations: &[(&str, &str)]) -> Self {
        self.with(name, TableKind::Sharded, locations)
    }

    pub(crate) fn global(self, name: &str, replicas: &[(&str, &str)]) -> Self {
        self.with(name, TableKind::Global, replicas)
    }

    fn with(mut self, name: &str, kind: TableKind, locations: &[(&str, &str)]) -> Self {
        let locations = locations
            .iter()
            .map(|(u, t)| PhysicalTableLocation::new(*u, *t))
            .collect();
        self.tables.insert(name.to_string(), (kind, locations));
        self
    }

    fn locations(&self, table: &LogicalTable) -> Vec<PhysicalTableLocation> {
        self.tables
            .get(&table.name)
            .map(|(_, l)| l.clone())
            .unwrap_or_default()
    }
}

impl ShardResolver for StaticResolver {
    fn logical_table(&self, name: &str) -> Option<LogicalTable> {
        self.tables.get(name).map(|(kind, _)| LogicalTable {
            name: name.to_string(),
            kind: *kind,
            schema: test_schema(),
        })
    }

    fn resolve_locations(
        &self,
        table: &LogicalTable,
        _predicates: &[Expr],
    ) -> Result<Vec<PhysicalTableLocation>> {
        Ok(self.locations(table))
    }

    fn resolve_global_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation> {
        self.locations(table)
            .into_iter()
            .next()
            .ok_or_else(|| ShqError::ShardResolutionEmpty {
                table: table.name.clone(),
            })
    }

    fn resolve_primary_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation> {
        self.locations(table)
            .pop()
            .ok_or_else(|| ShqError::ShardResolutionEmpty {
                table: table.name.clone(),
            })
    }
}
