use std::collections::HashMap;
use std::sync::Arc;

use shq_catalog::ShardCatalog;
use shq_client::{Engine, MemoryBackend, Session};
use shq_common::{EngineConfig, Row, ScalarValue, ShqError};

const CATALOG: &str = r#"[
  {
    "name": "users",
    "kind": "sharded",
    "columns": [
      {"name": "id", "type": "int64", "nullable": false},
      {"name": "name", "type": "utf8"}
    ],
    "sharding_column": "id",
    "shards": [
      {"unique_name": "db_a.users_1", "target": "ds_a", "key_values": [1, 2]},
      {"unique_name": "db_a.users_2", "target": "ds_a", "key_values": [3, 4]},
      {"unique_name": "db_b.users_3", "target": "ds_b", "key_values": [5, 6]}
    ]
  },
  {
    "name": "regions",
    "kind": "global",
    "columns": [{"name": "code", "type": "utf8"}],
    "replicas": [
      {"unique_name": "db_a.regions", "target": "ds_a"},
      {"unique_name": "db_b.regions", "target": "ds_b", "primary": true}
    ]
  }
]"#;

fn user(id: i64) -> Row {
    vec![ScalarValue::Int64(id), ScalarValue::Utf8(format!("user{id}"))]
}

fn region(code: &str) -> Row {
    vec![ScalarValue::Utf8(code.to_string())]
}

fn setup() -> (Engine, MemoryBackend) {
    let catalog = ShardCatalog::from_json_str(CATALOG).expect("catalog");
    let mut data = HashMap::new();
    data.insert("db_a.users_1".to_string(), vec![user(1), user(2)]);
    data.insert("db_a.users_2".to_string(), vec![user(3), user(4)]);
    data.insert("db_b.users_3".to_string(), vec![user(5), user(6)]);
    data.insert("db_a.regions".to_string(), vec![region("eu")]);
    data.insert("db_b.regions".to_string(), vec![region("eu")]);
    let backend = MemoryBackend::from_catalog(&catalog, data).expect("backend");
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(catalog),
        Arc::new(backend.clone()),
    )
    .expect("engine");
    (engine, backend)
}

async fn ids(session: &Session, sql: &str) -> Vec<i64> {
    let mut rows = session.query(sql).await.expect("query");
    let out = rows
        .collect()
        .await
        .expect("rows")
        .into_iter()
        .map(|r| match r[0] {
            ScalarValue::Int64(v) => v,
            ref other => panic!("unexpected id {other:?}"),
        })
        .collect();
    rows.close().await.expect("close");
    out
}

#[tokio::test]
async fn full_scan_reads_every_shard_in_target_order() {
    let (engine, backend) = setup();
    let session = engine.session();

    assert_eq!(
        ids(&session, "SELECT id, name FROM users").await,
        vec![1, 2, 3, 4, 5, 6]
    );
    assert_eq!(
        backend.sql_log(),
        vec![
            (
                "ds_a".to_string(),
                "(SELECT id, name FROM db_a.users_1) UNION ALL (SELECT id, name FROM db_a.users_2)"
                    .to_string()
            ),
            ("ds_b".to_string(), "SELECT id, name FROM db_b.users_3".to_string()),
        ]
    );
    assert_eq!(backend.acquired(), 2);
    assert_eq!(backend.open_connections(), 0);
}

#[tokio::test]
async fn point_query_touches_one_backend() {
    let (engine, backend) = setup();
    let session = engine.session();

    assert_eq!(ids(&session, "SELECT id FROM users WHERE id = 5").await, vec![5]);
    assert_eq!(
        backend.sql_log(),
        vec![(
            "ds_b".to_string(),
            "SELECT id FROM db_b.users_3 WHERE id = 5".to_string()
        )]
    );
}

#[tokio::test]
async fn filters_above_the_remote_scan_still_apply() {
    let (engine, _) = setup();
    let session = engine.session();
    assert_eq!(
        ids(&session, "SELECT id FROM users WHERE id IN (2, 3, 6) LIMIT 2").await,
        vec![2, 3]
    );
}

#[tokio::test]
async fn locking_read_of_global_table_uses_primary_replica() {
    let (engine, backend) = setup();
    let session = engine.session();

    let mut rows = session.query("SELECT code FROM regions").await.expect("query");
    assert_eq!(rows.collect().await.expect("rows"), vec![region("eu")]);
    rows.close().await.expect("close");

    let mut rows = session
        .query_for_update("SELECT code FROM regions")
        .await
        .expect("query");
    assert_eq!(rows.collect().await.expect("rows").len(), 1);
    rows.close().await.expect("close");

    let log = backend.sql_log();
    assert_eq!(log[0], ("ds_a".to_string(), "SELECT code FROM db_a.regions".to_string()));
    assert_eq!(
        log[1],
        (
            "ds_b".to_string(),
            "SELECT code FROM db_b.regions FOR UPDATE".to_string()
        )
    );
}

#[tokio::test]
async fn transaction_keeps_one_connection_per_target() {
    let (engine, backend) = setup();
    let session = engine.session();
    session.begin().expect("begin");
    assert!(session.in_transaction());

    for _ in 0..3 {
        assert_eq!(ids(&session, "SELECT id, name FROM users").await.len(), 6);
    }
    assert_eq!(backend.acquired(), 2);
    assert_eq!(backend.open_connections(), 2);

    session.commit().await.expect("commit");
    assert!(!session.in_transaction());
    assert_eq!(backend.open_connections(), 0);
    assert!(session.rollback().await.is_err());
}

#[tokio::test]
async fn unroutable_query_fails_to_compile() {
    let (engine, backend) = setup();
    let session = engine.session();

    let err = session
        .query("SELECT id FROM users WHERE id = 99")
        .await
        .unwrap_err();
    assert!(err.is_planning());
    assert!(matches!(
        session.explain("SELECT id FROM users WHERE id = 99"),
        Err(ShqError::ShardResolutionEmpty { ref table }) if table == "users"
    ));
    assert_eq!(backend.acquired(), 0);
}

#[tokio::test]
async fn cancelled_statement_does_not_poison_the_next_one() {
    let (engine, _) = setup();
    let session = engine.session();

    let mut rows = session.query("SELECT id FROM users").await.expect("query");
    session.cancel();
    assert!(rows.next_row().await.unwrap_err().is_cancelled());
    rows.close().await.expect("close");

    assert_eq!(ids(&session, "SELECT id FROM users WHERE id = 1").await, vec![1]);
    session.close().await.expect("session close");
}

#[test]
fn explain_shows_routing() {
    let (engine, _) = setup();
    let text = engine
        .session()
        .explain("SELECT name FROM users WHERE id = 3")
        .expect("explain");
    assert!(text.starts_with("logical plan:\n"));
    assert!(engine
        .prometheus_metrics()
        .contains("shq_plan_rewrites_total"));
    assert!(text.contains(
        "RemoteScan target=ds_a tables=[\"db_a.users_2\"]\n  sql=SELECT name FROM db_a.users_2 WHERE id = 3\n"
    ));
}

#[tokio::test]
async fn overlapping_statements_release_their_own_connections() {
    let (engine, backend) = setup();
    let session = engine.session();

    let mut first = session.query("SELECT id FROM users").await.expect("first");
    let mut second = session.query("SELECT id FROM users").await.expect("second");
    second.close().await.expect("close second");
    assert_eq!(backend.closed(), 2);

    assert_eq!(first.collect().await.expect("first rows").len(), 6);
    first.close().await.expect("close first");
    assert_eq!(backend.closed(), 4);
    assert_eq!(backend.open_connections(), 0);
}

#[tokio::test]
async fn dropped_iterator_is_released_when_the_session_closes() {
    let (engine, backend) = setup();
    let session = engine.session();

    drop(session.query("SELECT id FROM users").await.expect("query"));
    assert_eq!(backend.open_connections(), 2);

    session.close().await.expect("session close");
    assert_eq!(backend.open_connections(), 0);
}
