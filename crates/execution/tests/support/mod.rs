#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use shq_common::{Result, Row, ScalarValue, ShqError};
use shq_execution::{
    rows_stream, BackendConnection, ConnectionPool, SendableRowStream, SharedConnection,
};
use shq_planner::{create_distributed_plan, DistributedPlan, LogicalPlan, RemoteScan};

#[derive(Debug, Default)]
pub struct Recorder {
    pub acquire_batches: Mutex<Vec<Vec<String>>>,
    pub executed: Mutex<Vec<(String, String)>>,
    pub closed: AtomicUsize,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.acquire_batches.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.executed.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Pool whose connections return fixed rows per target, ignoring the SQL.
#[derive(Default)]
pub struct TestPool {
    rows: HashMap<String, Vec<Row>>,
    delay: Duration,
    failing: HashSet<String>,
    pub recorder: Arc<Recorder>,
}

impl TestPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, target: &str, rows: Vec<Row>) -> Self {
        self.rows.insert(target.to_string(), rows);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }
}

#[async_trait]
impl ConnectionPool for TestPool {
    async fn acquire_connections(
        &self,
        targets: &[String],
    ) -> Result<HashMap<String, VecDeque<SharedConnection>>> {
        self.recorder
            .acquire_batches
            .lock()
            .unwrap()
            .push(targets.to_vec());
        let mut out: HashMap<String, VecDeque<SharedConnection>> = HashMap::new();
        for target in targets {
            let conn = TestConnection {
                target: target.clone(),
                rows: self.rows.get(target).cloned().unwrap_or_default(),
                delay: self.delay,
                fail: self.failing.contains(target),
                recorder: Arc::clone(&self.recorder),
            };
            out.entry(target.clone())
                .or_default()
                .push_back(Arc::new(conn));
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct TestConnection {
    target: String,
    rows: Vec<Row>,
    delay: Duration,
    fail: bool,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl BackendConnection for TestConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn execute_query(&self, sql: &str, schema: SchemaRef) -> Result<SendableRowStream> {
        self.recorder
            .executed
            .lock()
            .unwrap()
            .push((self.target.clone(), sql.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ShqError::Fetch {
                target: self.target.clone(),
                message: "backend rejected query".to_string(),
            });
        }
        Ok(rows_stream(schema, self.rows.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

pub fn row(id: i64, name: &str) -> Row {
    vec![ScalarValue::Int64(id), ScalarValue::Utf8(name.to_string())]
}

/// Plan reading each `(table, target)` pair with its own remote scan.
pub fn remote_plan(scans: &[(&str, &str)]) -> DistributedPlan {
    let mut branches = scans
        .iter()
        .map(|(table, target)| {
            LogicalPlan::RemoteScan(RemoteScan::new(table, *target, schema(), false))
        })
        .collect::<Vec<_>>();
    let logical = if branches.len() == 1 {
        branches.remove(0)
    } else {
        LogicalPlan::Union { inputs: branches }
    };
    create_distributed_plan(&logical).expect("lower plan")
}
