mod support;

use std::sync::Arc;
use std::time::Duration;

use shq_common::{SessionId, ShqError};
use shq_execution::{
    run, ConnectionPool, Dispatcher, DistributedRuntime, FetchExecutor, FetchWait,
    LazyRowSequence, RowIterator, ScanSlots, TransactionContext,
};
use shq_planner::NodeId;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use support::{remote_plan, row, schema, TestPool};

fn runtime(timeout: Duration) -> DistributedRuntime {
    DistributedRuntime::with_dispatcher(Dispatcher::new(FetchExecutor::new(4), timeout))
}

fn context(pool: TestPool) -> (Arc<TransactionContext>, Arc<support::Recorder>) {
    let recorder = Arc::clone(&pool.recorder);
    (
        Arc::new(TransactionContext::new(SessionId::next(), Arc::new(pool))),
        recorder,
    )
}

#[tokio::test(start_paused = true)]
async fn transaction_fetch_times_out() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_delay(Duration::from_secs(600));
    let (tx, _) = context(pool);
    tx.begin().expect("begin");
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);

    let mut rows = runtime(Duration::from_millis(50))
        .execute(&tx, &plan)
        .await
        .expect("execute");
    let err = rows.next_row().await.unwrap_err();
    assert!(matches!(err, ShqError::FetchTimeout { ref target, .. } if target == "ds_a"));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn autocommit_fetch_waits_without_bound() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_delay(Duration::from_secs(600));
    let (tx, _) = context(pool);
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);

    let mut rows = runtime(Duration::from_millis(50))
        .execute(&tx, &plan)
        .await
        .expect("execute");
    assert_eq!(RowIterator::collect(&mut rows).await.expect("rows"), vec![row(1, "a")]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_pull_fails_every_pull() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_rows("ds_b", vec![row(2, "b")])
        .with_delay(Duration::from_secs(600));
    let (tx, recorder) = context(pool);
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db1.t_1", "ds_b")]);

    let mut rows = runtime(Duration::from_secs(60))
        .execute(&tx, &plan)
        .await
        .expect("execute");
    tx.cancel();
    for _ in 0..3 {
        assert!(rows.next_row().await.unwrap_err().is_cancelled());
    }
    rows.close().await.expect("close");
    assert_eq!(recorder.closed(), 2);

    // The next statement starts with a fresh token.
    let fresh = tx.begin_statement();
    assert!(!fresh.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_waiting_pull() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_delay(Duration::from_secs(600));
    let (tx, _) = context(pool);
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);
    let mut rows = runtime(Duration::from_secs(60))
        .execute(&tx, &plan)
        .await
        .expect("execute");

    let canceller = Arc::clone(&tx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });
    assert!(rows.next_row().await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn backend_failure_surfaces_on_pull() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a"), row(2, "a")])
        .failing("ds_b");
    let (tx, _) = context(pool);
    let plan = remote_plan(&[("db0.t_0", "ds_a"), ("db1.t_1", "ds_b")]);
    let mut rows = runtime(Duration::from_secs(60))
        .execute(&tx, &plan)
        .await
        .expect("execute");

    assert_eq!(rows.next_row().await.expect("first"), Some(row(1, "a")));
    assert_eq!(rows.next_row().await.expect("second"), Some(row(2, "a")));
    let err = rows.next_row().await.unwrap_err();
    assert!(matches!(err, ShqError::Fetch { ref target, .. } if target == "ds_b"));
    assert!(matches!(rows.next_row().await, Err(ShqError::Execution(_))));
}

#[tokio::test]
async fn slots_are_write_once() {
    let pool = TestPool::new();
    let mut conns = pool
        .acquire_connections(&["ds_a".to_string(), "ds_a".to_string()])
        .await
        .expect("acquire");
    let queue = conns.get_mut("ds_a").expect("queue");
    let executor = FetchExecutor::new(1);
    let mut seq = || {
        let conn = queue.pop_front().expect("connection");
        LazyRowSequence::new(
            schema(),
            executor.submit(conn, "SELECT 1".to_string(), schema(), "autocommit"),
            FetchWait::Unbounded,
            CancellationToken::new(),
        )
    };

    let first = seq();
    assert_eq!(first.target(), "ds_a");
    assert_eq!(first.wait(), FetchWait::Unbounded);

    let mut slots = ScanSlots::new();
    assert!(matches!(slots.take(NodeId(0)), Err(ShqError::Execution(_))));
    slots.bind(NodeId(0), first).expect("first bind");
    assert!(matches!(
        slots.bind(NodeId(0), seq()),
        Err(ShqError::Execution(_))
    ));
    assert!(slots.take(NodeId(0)).is_ok());
    assert!(matches!(slots.take(NodeId(0)), Err(ShqError::Execution(_))));
}

#[tokio::test]
async fn running_an_undispatched_plan_fails() {
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);
    let err = run(&plan, &mut ScanSlots::new(), CancellationToken::new(), None).unwrap_err();
    assert!(matches!(err, ShqError::Execution(_)));
}

#[tokio::test(start_paused = true)]
async fn cancelled_stream_ends_after_one_error() {
    let pool = TestPool::new()
        .with_rows("ds_a", vec![row(1, "a")])
        .with_delay(Duration::from_secs(600));
    let (tx, _) = context(pool);
    let plan = remote_plan(&[("db0.t_0", "ds_a")]);
    let mut rows = runtime(Duration::from_secs(60))
        .execute(&tx, &plan)
        .await
        .expect("execute");
    tx.cancel();

    let items = StreamExt::collect::<Vec<_>>(&mut rows).await;
    assert_eq!(items.len(), 1);
    assert!(items[0].as_ref().unwrap_err().is_cancelled());
    // Direct pulls keep failing fast.
    assert!(rows.next_row().await.unwrap_err().is_cancelled());
}
