use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use shq_common::{Result, ScalarValue, ShqError};
use shq_planner::{
    split_conjunction, BinaryOp, Expr, LogicalTable, PhysicalTableLocation, ShardResolver,
    TableKind,
};
use tracing::debug;

/// Column type names accepted in catalog files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl From<ColumnType> for DataType {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Utf8 => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// One shard of a sharded table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardDef {
    pub unique_name: String,
    pub target: String,
    /// Sharding-column values stored in this shard. `None` means unknown:
    /// the shard is never pruned.
    #[serde(default)]
    pub key_values: Option<Vec<ScalarValue>>,
}

/// One replica of a global table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaDef {
    pub unique_name: String,
    pub target: String,
    /// Write-capable replica used by locking reads.
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub sharding_column: Option<String>,
    #[serde(default)]
    pub shards: Vec<ShardDef>,
    #[serde(default)]
    pub replicas: Vec<ReplicaDef>,
}

impl TableDef {
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.data_type.into(), c.nullable))
                .collect::<Vec<_>>(),
        )
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ShqError::InvalidConfig(format!("table {}: {msg}", self.name)));
        if self.columns.is_empty() {
            return invalid("no columns".to_string());
        }
        if let Some(col) = &self.sharding_column {
            if !self.columns.iter().any(|c| &c.name == col) {
                return invalid(format!("sharding column {col} is not a column"));
            }
        }
        match self.kind {
            TableKind::Sharded => {
                if self.shards.is_empty() {
                    return invalid("sharded table without shards".to_string());
                }
                if self.sharding_column.is_none()
                    && self.shards.iter().any(|s| s.key_values.is_some())
                {
                    return invalid("key_values given without a sharding_column".to_string());
                }
            }
            TableKind::Global => {
                if self.replicas.is_empty() {
                    return invalid("global table without replicas".to_string());
                }
                if self.replicas.iter().filter(|r| r.primary).count() > 1 {
                    return invalid("more than one primary replica".to_string());
                }
            }
        }
        Ok(())
    }
}

/// In-memory shard catalog.
#[derive(Debug, Default)]
pub struct ShardCatalog {
    tables: HashMap<String, TableDef>,
}

impl ShardCatalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn register_table(&mut self, table: TableDef) -> Result<()> {
        table.validate()?;
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| ShqError::Planning(format!("unknown table: {name}")))
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names = self.tables.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let tables: Vec<TableDef> =
            serde_json::from_str(s).map_err(|e| ShqError::InvalidConfig(e.to_string()))?;
        let mut cat = ShardCatalog::new();
        for t in tables {
            cat.register_table(t)?;
        }
        Ok(cat)
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    fn replica(&self, table: &LogicalTable, pick_primary: bool) -> Result<PhysicalTableLocation> {
        let def = self.get(&table.name)?;
        let replica = pick_primary
            .then(|| def.replicas.iter().find(|r| r.primary))
            .flatten()
            .or_else(|| def.replicas.first())
            .ok_or_else(|| ShqError::ShardResolutionEmpty {
                table: table.name.clone(),
            })?;
        Ok(PhysicalTableLocation::new(&replica.unique_name, &replica.target))
    }
}

impl ShardResolver for ShardCatalog {
    fn logical_table(&self, name: &str) -> Option<LogicalTable> {
        self.tables.get(name).map(|def| LogicalTable {
            name: def.name.clone(),
            kind: def.kind,
            schema: Arc::new(def.schema()),
        })
    }

    fn resolve_locations(
        &self,
        table: &LogicalTable,
        predicates: &[Expr],
    ) -> Result<Vec<PhysicalTableLocation>> {
        let def = self.get(&table.name)?;
        let keys = def
            .sharding_column
            .as_deref()
            .and_then(|col| candidate_keys(col, predicates));
        let locations = def
            .shards
            .iter()
            .filter(|shard| match (&keys, &shard.key_values) {
                (Some(keys), Some(values)) => {
                    values.iter().any(|v| keys.iter().any(|k| k.sql_eq(v)))
                }
                _ => true,
            })
            .map(|shard| PhysicalTableLocation::new(&shard.unique_name, &shard.target))
            .collect::<Vec<_>>();
        debug!(
            table = %table.name,
            shards = def.shards.len(),
            locations = locations.len(),
            pruned = keys.is_some(),
            "resolved shard locations"
        );
        Ok(locations)
    }

    fn resolve_global_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation> {
        self.replica(table, false)
    }

    fn resolve_primary_replica(&self, table: &LogicalTable) -> Result<PhysicalTableLocation> {
        self.replica(table, true)
    }
}

/// Sharding-key values allowed by the conjunction of `predicates`, or `None`
/// when they do not constrain `column`.
///
/// Only `column = literal` (either side) and `column IN (literals)` are
/// understood; several constraints intersect.
fn candidate_keys(column: &str, predicates: &[Expr]) -> Option<Vec<ScalarValue>> {
    let mut keys: Option<Vec<ScalarValue>> = None;
    for conjunct in predicates.iter().flat_map(split_conjunction) {
        let Some(values) = key_constraint(column, conjunct) else {
            continue;
        };
        keys = Some(match keys {
            None => values,
            Some(prev) => prev
                .into_iter()
                .filter(|p| values.iter().any(|v| v.sql_eq(p)))
                .collect(),
        });
    }
    keys
}

fn key_constraint(column: &str, expr: &Expr) -> Option<Vec<ScalarValue>> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOp::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(v)) | (Expr::Literal(v), Expr::Column(c))
                if c == column =>
            {
                Some(vec![v.clone()])
            }
            _ => None,
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } => match expr.as_ref() {
            Expr::Column(c) if c == column => list
                .iter()
                .map(|item| match item {
                    Expr::Literal(v) => Some(v.clone()),
                    _ => None,
                })
                .collect(),
            _ => None,
        },
        _ => None,
    }
}
