mod support;

use std::sync::Arc;
use std::time::Duration;

use shq_catalog::ShardCatalog;
use shq_common::{SessionId, ShqError};
use shq_execution::{Dispatcher, DistributedRuntime, FetchExecutor, ScanSlots, TransactionContext};
use shq_planner::{CompilerConfig, PlanCompiler};

use support::{remote_plan, row, TestPool};

fn context(pool: TestPool) -> (Arc<TransactionContext>, Arc<support::Recorder>) {
    let recorder = Arc::clone(&pool.recorder);
    (
        Arc::new(TransactionContext::new(SessionId::next(), Arc::new(pool))),
        recorder,
    )
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(FetchExecutor::new(4), Duration::from_secs(60))
}

#[tokio::test]
async fn duplicate_target_in_transaction_submits_nothing() {
    let (tx, recorder) = context(TestPool::new());
    tx.begin().expect("begin");
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db0.t_1", "ds_a"), ("db1.t_2", "ds_b")]);
    let mut slots = ScanSlots::new();

    let err = dispatcher()
        .fork(&tx, &plan, &mut slots)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShqError::DuplicateTargetInTransaction { ref target, scans: 2 } if target == "ds_a"
    ));
    assert!(recorder.batches().is_empty());
    assert!(recorder.executed().is_empty());
    assert_eq!(slots.ready(), 0);
}

#[tokio::test]
async fn same_plan_is_fine_in_autocommit() {
    let (tx, recorder) = context(TestPool::new());
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db0.t_1", "ds_a"), ("db1.t_2", "ds_b")]);
    let mut slots = ScanSlots::new();
    let submitted = dispatcher().fork(&tx, &plan, &mut slots).await.expect("fork");
    assert_eq!(submitted, 3);
    assert_eq!(
        recorder.batches(),
        vec![vec!["ds_a".to_string(), "ds_a".to_string(), "ds_b".to_string()]]
    );
    assert_eq!(slots.held(), 3);
    assert_eq!(tx.pending_close_count(), 0);
}

#[tokio::test]
async fn fork_only_fills_empty_slots() {
    let (tx, _) = context(TestPool::new());
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db1.t_1", "ds_b")]);
    let mut slots = ScanSlots::new();
    let d = dispatcher();
    assert_eq!(d.fork(&tx, &plan, &mut slots).await.expect("first"), 2);
    assert_eq!(d.fork(&tx, &plan, &mut slots).await.expect("second"), 0);
    assert_eq!(slots.ready(), 2);
}

#[tokio::test]
async fn transaction_reuses_bound_connections() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_rows("ds_b", vec![row(2, "b")]);
    let (tx, recorder) = context(pool);
    tx.begin().expect("begin");
    let runtime = DistributedRuntime::with_dispatcher(dispatcher());
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db1.t_1", "ds_b")]);

    for _ in 0..2 {
        let mut rows = runtime.execute(&tx, &plan).await.expect("execute");
        assert_eq!(rows.collect().await.expect("rows").len(), 2);
        rows.close().await.expect("close");
    }
    assert_eq!(
        recorder.batches(),
        vec![vec!["ds_a".to_string()], vec!["ds_b".to_string()]]
    );
    assert_eq!(recorder.closed(), 0);

    tx.end_transaction().await.expect("end");
    assert_eq!(recorder.closed(), 2);
    assert!(!tx.is_in_transaction());
}

#[tokio::test]
async fn three_shards_on_two_targets_end_to_end() {
    let catalog = ShardCatalog::from_json_str(
        r#"[{
            "name": "orders",
            "kind": "sharded",
            "columns": [
                {"name": "id", "type": "int64", "nullable": false},
                {"name": "name", "type": "utf8"}
            ],
            "shards": [
                {"unique_name": "db_a.orders_1", "target": "ds_a"},
                {"unique_name": "db_a.orders_2", "target": "ds_a"},
                {"unique_name": "db_b.orders_3", "target": "ds_b"}
            ]
        }]"#,
    )
    .expect("catalog");
    let compiler = PlanCompiler::new(Arc::new(catalog), CompilerConfig::default());
    let plan = compiler
        .try_compile_sql("SELECT id, name FROM orders", false)
        .expect("compile");

    // ds_a answers for shards 1 and 2, ds_b for shard 3.
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "s1"), row(2, "s1"), row(3, "s2")])
        .with_rows("ds_b", vec![row(4, "s3"), row(5, "s3")]);
    let (tx, recorder) = context(pool);
    let mut slots = ScanSlots::new();
    let submitted = dispatcher().fork(&tx, &plan, &mut slots).await.expect("fork");
    assert_eq!(submitted, 2);
    assert_eq!(
        recorder.batches(),
        vec![vec!["ds_a".to_string(), "ds_b".to_string()]]
    );

    let mut rows = shq_execution::run(&plan, &mut slots, tx.cancel_token(), Some(Arc::clone(&tx)))
        .expect("run");
    assert_eq!(rows.column_names(), vec!["id", "name"]);
    let ids = rows
        .collect()
        .await
        .expect("rows")
        .into_iter()
        .map(|r| r[0].to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    let executed = recorder.executed();
    let a_sql = executed
        .iter()
        .find(|(t, _)| t == "ds_a")
        .map(|(_, sql)| sql.clone())
        .unwrap_or_default();
    assert_eq!(
        a_sql,
        "(SELECT id, name FROM db_a.orders_1) UNION ALL (SELECT id, name FROM db_a.orders_2)"
    );

    rows.close().await.expect("close");
    assert_eq!(recorder.closed(), 2);
    assert_eq!(tx.pending_close_count(), 0);
}

#[tokio::test]
async fn closing_one_execution_leaves_another_running() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_rows("ds_b", vec![row(2, "b")]);
    let (tx, recorder) = context(pool);
    let runtime = DistributedRuntime::with_dispatcher(dispatcher());
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db1.t_1", "ds_b")]);

    let mut first = runtime.execute(&tx, &plan).await.expect("first");
    let mut second = runtime.execute(&tx, &plan).await.expect("second");
    second.close().await.expect("close second");
    assert_eq!(recorder.closed(), 2);

    assert_eq!(
        first.collect().await.expect("first rows"),
        vec![row(1, "a"), row(2, "b")]
    );
    first.close().await.expect("close first");
    assert_eq!(recorder.closed(), 4);
    assert_eq!(tx.pending_close_count(), 0);
}

#[tokio::test]
async fn dropped_execution_is_swept_at_session_close() {
    let pool = TestPool::new().with_rows("ds_a", vec![row(1, "a")]);
    let (tx, recorder) = context(pool);
    let runtime = DistributedRuntime::with_dispatcher(dispatcher());
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);

    let rows = runtime.execute(&tx, &plan).await.expect("execute");
    drop(rows);
    assert_eq!(tx.pending_close_count(), 1);
    assert_eq!(recorder.closed(), 0);

    tx.close().await.expect("session close");
    assert_eq!(recorder.closed(), 1);
}
