//! In-process backend: every target hosts a set of in-memory tables and its
//! connections answer the generated SQL by evaluating it locally.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use shq_catalog::ShardCatalog;
use shq_common::{Result, Row, ShqError};
use shq_execution::{
    bounded_row_channel, compile_expr, empty_stream, is_true, BackendConnection, ConnectionPool,
    SendableRowStream, SharedConnection,
};
use shq_planner::{project_schema, sql_to_query, Expr, LogicalPlan};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// Rows of one physical table.
#[derive(Debug, Clone)]
pub struct MemTable {
    pub schema: SchemaRef,
    pub rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct BackendState {
    /// target -> unique table name -> table
    tables: HashMap<String, HashMap<String, MemTable>>,
    acquired: AtomicUsize,
    closed: AtomicUsize,
    sql_log: Mutex<Vec<(String, String)>>,
}

/// [`ConnectionPool`] over in-memory tables, with acquisition/close counters
/// and a log of every statement a backend received.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<BackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host `unique_name` on `target`. Only valid before the backend is
    /// shared with a pool user.
    pub fn with_table(
        mut self,
        target: &str,
        unique_name: &str,
        schema: SchemaRef,
        rows: Vec<Row>,
    ) -> Result<Self> {
        let state = Arc::get_mut(&mut self.state).ok_or_else(|| {
            ShqError::InvalidConfig("memory backend is already shared".to_string())
        })?;
        state
            .tables
            .entry(target.to_string())
            .or_default()
            .insert(unique_name.to_string(), MemTable { schema, rows });
        Ok(self)
    }

    /// Create every shard and replica the catalog names, filled from `data`
    /// (unique table name -> rows). Locations without data start empty.
    pub fn from_catalog(catalog: &ShardCatalog, mut data: HashMap<String, Vec<Row>>) -> Result<Self> {
        let mut backend = Self::new();
        for name in catalog.table_names() {
            let def = catalog.get(name)?;
            let schema: SchemaRef = Arc::new(def.schema());
            let locations = def
                .shards
                .iter()
                .map(|s| (&s.target, &s.unique_name))
                .chain(def.replicas.iter().map(|r| (&r.target, &r.unique_name)));
            for (target, unique_name) in locations {
                let rows = data.remove(unique_name.as_str()).unwrap_or_default();
                if let Some(bad) = rows.iter().find(|r| r.len() != schema.fields().len()) {
                    return Err(ShqError::InvalidConfig(format!(
                        "row {bad:?} of {unique_name} does not match table {name}"
                    )));
                }
                backend = backend.with_table(target, unique_name, Arc::clone(&schema), rows)?;
            }
        }
        if let Some(unknown) = data.keys().next() {
            return Err(ShqError::InvalidConfig(format!(
                "data given for unknown physical table {unknown}"
            )));
        }
        Ok(backend)
    }

    /// [`MemoryBackend::from_catalog`] with data read from a JSON object
    /// mapping unique table names to arrays of rows.
    pub fn load_from_json(catalog: &ShardCatalog, path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let data: HashMap<String, Vec<Row>> =
            serde_json::from_str(&s).map_err(|e| ShqError::InvalidConfig(e.to_string()))?;
        Self::from_catalog(catalog, data)
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections handed out and not closed yet.
    pub fn open_connections(&self) -> usize {
        self.acquired().saturating_sub(self.closed())
    }

    /// `(target, sql)` of every statement received, in arrival order.
    pub fn sql_log(&self) -> Vec<(String, String)> {
        self.state
            .sql_log
            .lock()
            .expect("sql log lock poisoned")
            .clone()
    }
}

#[async_trait]
impl ConnectionPool for MemoryBackend {
    async fn acquire_connections(
        &self,
        targets: &[String],
    ) -> Result<HashMap<String, VecDeque<SharedConnection>>> {
        let mut out: HashMap<String, VecDeque<SharedConnection>> = HashMap::new();
        for target in targets {
            if !self.state.tables.contains_key(target) {
                return Err(ShqError::Fetch {
                    target: target.clone(),
                    message: "unknown backend target".to_string(),
                });
            }
            let conn = MemoryConnection {
                target: target.clone(),
                state: Arc::clone(&self.state),
                closed: AtomicBool::new(false),
            };
            out.entry(target.clone()).or_default().push_back(Arc::new(conn));
        }
        self.state.acquired.fetch_add(targets.len(), Ordering::SeqCst);
        debug!(connections = targets.len(), "memory connections acquired");
        Ok(out)
    }
}

#[derive(Debug)]
struct MemoryConnection {
    target: String,
    state: Arc<BackendState>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn fetch_error(&self, message: impl Into<String>) -> ShqError {
        ShqError::Fetch {
            target: self.target.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl BackendConnection for MemoryConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn execute_query(&self, sql: &str, schema: SchemaRef) -> Result<SendableRowStream> {
        self.state
            .sql_log
            .lock()
            .expect("sql log lock poisoned")
            .push((self.target.clone(), sql.to_string()));
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.fetch_error("connection is closed"));
        }
        let tables = self
            .state
            .tables
            .get(&self.target)
            .ok_or_else(|| self.fetch_error("unknown backend target"))?;
        let query = sql_to_query(sql).map_err(|e| self.fetch_error(e.to_string()))?;
        let (_, rows) = evaluate(&query.plan, tables).map_err(|e| self.fetch_error(e.to_string()))?;
        if let Some(bad) = rows.iter().find(|r| r.len() != schema.fields().len()) {
            return Err(self.fetch_error(format!("result row {bad:?} does not match the expected columns")));
        }
        if rows.is_empty() {
            return Ok(empty_stream(schema));
        }

        let (mut sender, stream) = bounded_row_channel(schema, CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for row in rows {
                if sender.send_row(row).await.is_err() {
                    // Reader went away.
                    break;
                }
            }
        });
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(self.fetch_error("connection closed twice"));
        }
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn evaluate(plan: &LogicalPlan, tables: &HashMap<String, MemTable>) -> Result<(SchemaRef, Vec<Row>)> {
    match plan {
        LogicalPlan::TableScan {
            table,
            projection,
            filters,
        } => {
            let t = tables
                .get(table)
                .ok_or_else(|| ShqError::Execution(format!("table {table} does not exist")))?;
            let mut rows = t.rows.clone();
            for f in filters {
                rows = filter_rows(f, &t.schema, rows)?;
            }
            match projection {
                Some(cols) => {
                    let exprs = cols
                        .iter()
                        .map(|c| (Expr::col(c.as_str()), c.clone()))
                        .collect::<Vec<_>>();
                    project_rows(&exprs, &t.schema, rows)
                }
                None => Ok((Arc::clone(&t.schema), rows)),
            }
        }
        LogicalPlan::Filter { predicate, input } => {
            let (schema, rows) = evaluate(input, tables)?;
            let rows = filter_rows(predicate, &schema, rows)?;
            Ok((schema, rows))
        }
        LogicalPlan::Projection { exprs, input } => {
            let (schema, rows) = evaluate(input, tables)?;
            project_rows(exprs, &schema, rows)
        }
        LogicalPlan::Union { inputs } => {
            let mut schema = None;
            let mut out = Vec::new();
            for input in inputs {
                let (s, rows) = evaluate(input, tables)?;
                schema.get_or_insert(s);
                out.extend(rows);
            }
            let schema =
                schema.ok_or_else(|| ShqError::Execution("union without inputs".to_string()))?;
            Ok((schema, out))
        }
        LogicalPlan::Limit { n, input } => {
            let (schema, mut rows) = evaluate(input, tables)?;
            rows.truncate(*n);
            Ok((schema, rows))
        }
        LogicalPlan::PhysicalScan(_) | LogicalPlan::RemoteScan(_) => Err(ShqError::Unsupported(
            "backend statements reference tables by name only".to_string(),
        )),
    }
}

fn filter_rows(predicate: &Expr, schema: &SchemaRef, rows: Vec<Row>) -> Result<Vec<Row>> {
    let predicate = compile_expr(predicate, schema)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if is_true(&predicate.evaluate(&row)?) {
            out.push(row);
        }
    }
    Ok(out)
}

fn project_rows(
    exprs: &[(Expr, String)],
    schema: &SchemaRef,
    rows: Vec<Row>,
) -> Result<(SchemaRef, Vec<Row>)> {
    let out_schema = project_schema(exprs, schema)?;
    let compiled = exprs
        .iter()
        .map(|(e, _)| compile_expr(e, schema))
        .collect::<Result<Vec<_>>>()?;
    let rows = rows
        .iter()
        .map(|row| compiled.iter().map(|e| e.evaluate(row)).collect::<Result<Row>>())
        .collect::<Result<Vec<_>>>()?;
    Ok((out_schema, rows))
}
