//! End-to-end scenario tests against the in-memory InfluxDB mock
//!
//! Covers:
//! 1. Count-bounded writes and error accounting
//! 2. Multi-bucket writes and provisioning failures
//! 3. Run-scoped deletes, dry runs and context validation
//! 4. User lifecycle, health and identity probes
//! 5. Ledger-driven cleanup

use std::sync::Arc;
use std::time::Duration;

use bddbench_client::{Endpoint, InfluxApi, MockFailure, MockInfluxApi, QueryKind, ResultSize};
use bddbench_core::{BenchError, BucketSet, ContextError, RunId, StopCondition, WorkloadSpec};
use bddbench_engine::context_store;
use bddbench_engine::kpi::{
    DELETE_MEASUREMENT, HEALTH_MEASUREMENT, ME_MEASUREMENT, MULTI_WRITE_MEASUREMENT,
    USER_MEASUREMENT, WRITE_MEASUREMENT,
};
use bddbench_engine::{
    verify_deleted, BenchEnv, CleanupMode, CleanupScenario, DeleteMode, DeleteScenario,
    LedgerFile, MultiWriteScenario, ProbeKind, ProbeScenario, QueryScenario, QuerySource,
    ReportWriter, UserScenario, WriteScenario, SUT,
};
use tempfile::TempDir;

const BUCKET: &str = "bench";

fn env(dir: &TempDir, mock: &Arc<MockInfluxApi>) -> BenchEnv {
    let api: Arc<dyn InfluxApi> = mock.clone();
    BenchEnv::new(
        api,
        "http://sut.test:8086",
        ReportWriter::new(dir.path(), "test"),
        LedgerFile::new(dir.path().join("state.json")),
    )
}

fn spec(batch_size: usize, workers: usize, batches: u64) -> WorkloadSpec {
    WorkloadSpec::builder("cpu")
        .batch_size(batch_size)
        .workers(workers)
        .stop(StopCondition::Count { total: batches })
        .build()
        .unwrap()
}

fn kpi_lines(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("kpi.lp"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_count_bounded_write_publishes_everything() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));

    let outcome = WriteScenario::new("write-basic", spec(10, 1, 100), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    assert_eq!(outcome.stats.count, 100);
    assert_eq!(outcome.stats.total_points, 1_000);
    assert_eq!(outcome.stats.error_count, 0);
    assert_eq!(mock.point_count(BUCKET), 1_000);

    assert!(outcome.published.report_path.exists());
    let lines = kpi_lines(&dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with(WRITE_MEASUREMENT));

    let context = context_store::load(context_store::default_path(dir.path(), "write-basic"))
        .await
        .unwrap();
    assert_eq!(context.run_id, outcome.run_id);
    assert_eq!(context.total_points, Some(1_000));

    let ledger = LedgerFile::new(dir.path().join("state.json")).read().await.unwrap();
    assert_eq!(ledger.writes(SUT).count(), 1);
}

#[tokio::test]
async fn test_failed_writes_are_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(
        MockInfluxApi::new_with_failures(vec![
            MockFailure::Status(500, "internal error"),
            MockFailure::Transport("connection reset"),
        ])
        .with_buckets([BUCKET]),
    );

    let outcome = WriteScenario::new("write-errors", spec(10, 2, 50), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    assert_eq!(outcome.stats.count, 50);
    assert_eq!(outcome.stats.error_count, 2);
    assert!((outcome.stats.error_rate - 0.04).abs() < 1e-9);
    assert_eq!(outcome.stats.written_points, 480);
    assert_eq!(mock.point_count(BUCKET), 480);
    assert_eq!(outcome.record.float("errors_count"), Some(2.0));
}

#[tokio::test]
async fn test_multi_write_applies_count_per_bucket() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());
    let set = BucketSet::new("multi", 3).unwrap();

    let outcome = MultiWriteScenario::new("multi-write", spec(10, 2, 50), set.clone())
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    assert_eq!(mock.bucket_names(), set.names());
    for name in set.names() {
        assert_eq!(mock.point_count(&name), 500, "bucket {name}");
    }
    assert_eq!(outcome.stats.total_points, 1_500);
    assert_eq!(outcome.record.measurement, MULTI_WRITE_MEASUREMENT);
    assert_eq!(outcome.record.float("bucket_count"), Some(3.0));

    let ledger = LedgerFile::new(dir.path().join("state.json")).read().await.unwrap();
    assert_eq!(ledger.buckets(SUT).len(), 3);
    assert_eq!(ledger.writes(SUT).count(), 3);
}

#[tokio::test]
async fn test_provisioning_failure_aborts_before_writing() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());
    mock.reject_bucket("multi_1", 403);

    let err = MultiWriteScenario::new("multi-denied", spec(10, 1, 5), BucketSet::new("multi", 3).unwrap())
        .run(&env(&dir, &mock))
        .await
        .unwrap_err();

    assert!(
        matches!(&err, BenchError::Provisioning { bucket, .. } if bucket == "multi_1"),
        "unexpected error: {err}"
    );
    assert_eq!(mock.calls_to(Endpoint::Write), 0);
    assert!(kpi_lines(&dir).is_empty());
}

#[tokio::test]
async fn test_run_scoped_delete_removes_only_its_run() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));

    let first = WriteScenario::new("write-a", spec(10, 2, 20), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();
    let second_env = env(&dir, &mock).with_run_id(RunId::new());
    WriteScenario::new("write-b", spec(10, 2, 20), BUCKET)
        .run(&second_env)
        .await
        .unwrap();
    assert_eq!(mock.point_count(BUCKET), 400);

    let context_path = context_store::default_path(dir.path(), "write-a");
    let outcome = DeleteScenario::new(
        "delete-a",
        DeleteMode::RunScoped {
            context_path,
            measurement: Some("cpu".to_string()),
        },
    )
    .run(&env(&dir, &mock))
    .await
    .unwrap();

    assert_eq!(outcome.run_id, first.run_id);
    assert_eq!(outcome.record.measurement, DELETE_MEASUREMENT);
    assert_eq!(outcome.record.float("points_before"), Some(200.0));
    assert_eq!(outcome.record.float("points_after"), Some(0.0));
    assert_eq!(outcome.record.float("deleted_points"), Some(200.0));
    assert!(outcome.record.has_field("delete_duration_ms"));
    assert_eq!(mock.point_count(BUCKET), 200);

    let api: Arc<dyn InfluxApi> = mock.clone();
    let context = first.context.unwrap();
    assert_eq!(verify_deleted(&api, &context).await.unwrap(), 0);
}

#[tokio::test]
async fn test_verification_fails_while_points_remain() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));
    let outcome = WriteScenario::new("write-kept", spec(5, 1, 2), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    let api: Arc<dyn InfluxApi> = mock.clone();
    let err = verify_deleted(&api, &outcome.context.unwrap()).await.unwrap_err();
    assert!(matches!(err, BenchError::Verification(_)));
}

#[tokio::test]
async fn test_dry_run_delete_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));
    WriteScenario::new("write-dry", spec(10, 1, 10), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    let outcome = DeleteScenario::new(
        "delete-dry",
        DeleteMode::RunScoped {
            context_path: context_store::default_path(dir.path(), "write-dry"),
            measurement: None,
        },
    )
    .dry_run(true)
    .run(&env(&dir, &mock))
    .await
    .unwrap();

    assert_eq!(mock.calls_to(Endpoint::Delete), 0);
    assert_eq!(mock.point_count(BUCKET), 100);
    assert!(!outcome.record.has_field("delete_duration_ms"));
    assert_eq!(outcome.record.tags.get("dry_run").map(String::as_str), Some("true"));
    assert_eq!(outcome.record.float("deleted_points"), Some(0.0));
}

#[tokio::test]
async fn test_range_delete_probes_health_around_the_delete() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));

    let outcome = DeleteScenario::new(
        "delete-range",
        DeleteMode::Range {
            bucket: BUCKET.to_string(),
            range: "1h".to_string(),
            measurement: Some("cpu".to_string()),
            predicate: None,
            health_probes: 3,
        },
    )
    .run(&env(&dir, &mock))
    .await
    .unwrap();

    assert_eq!(mock.calls_to(Endpoint::Health), 6);
    assert_eq!(mock.calls_to(Endpoint::Delete), 1);
    assert_eq!(outcome.record.float("delete_range_sec"), Some(3_600.0));
    assert_eq!(outcome.record.tags.get("delete_range").map(String::as_str), Some("1h"));
    assert!(outcome.record.has_field("health_before_avg_ms"));
    assert!(!outcome.record.has_field("points_before"));
}

#[tokio::test]
async fn test_missing_or_mismatched_context_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));

    let query = QueryScenario {
        scenario_id: "query-orphan".to_string(),
        source: QuerySource::Context {
            path: dir.path().join("nope_context.json"),
            measurement: "cpu".to_string(),
        },
        kind: QueryKind::Filter,
        time_range: Duration::from_secs(3_600),
        size: ResultSize::Small,
        workers: 1,
        stop: StopCondition::Count { total: 1 },
    };
    let err = query.run(&env(&dir, &mock)).await.unwrap_err();
    assert!(matches!(err, BenchError::Context(ContextError::Missing { .. })));

    WriteScenario::new("write-cpu", spec(5, 1, 1), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();
    let err = DeleteScenario::new(
        "delete-mem",
        DeleteMode::RunScoped {
            context_path: context_store::default_path(dir.path(), "write-cpu"),
            measurement: Some("mem".to_string()),
        },
    )
    .run(&env(&dir, &mock))
    .await
    .unwrap_err();
    assert!(matches!(err, BenchError::Context(ContextError::MeasurementMismatch { .. })));
    assert_eq!(mock.calls_to(Endpoint::Delete), 0);
}

#[tokio::test]
async fn test_query_reads_back_written_rows() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new().with_buckets([BUCKET]));
    WriteScenario::new("write-q", spec(10, 1, 5), BUCKET)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    let query = QueryScenario {
        scenario_id: "query-q".to_string(),
        source: QuerySource::Context {
            path: context_store::default_path(dir.path(), "write-q"),
            measurement: "cpu".to_string(),
        },
        kind: QueryKind::Filter,
        time_range: Duration::from_secs(3_600),
        size: ResultSize::Large,
        workers: 2,
        stop: StopCondition::Count { total: 4 },
    };
    let outcome = query.run(&env(&dir, &mock)).await.unwrap();

    assert_eq!(outcome.stats.count, 4);
    assert_eq!(outcome.stats.error_count, 0);
    assert!(outcome.stats.total_rows > 0);
    assert!(outcome.record.tags.contains_key("run_id"));
}

#[tokio::test]
async fn test_user_lifecycle_cleans_up_after_itself() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());

    let outcome = UserScenario::new("users", 6, 3)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    assert_eq!(mock.user_count(), 0);
    assert_eq!(outcome.record.measurement, USER_MEASUREMENT);
    assert_eq!(outcome.record.float("num_users"), Some(6.0));
    assert_eq!(outcome.record.float("total_errors"), Some(0.0));
    // 6 creates, 1 list, 6 deletes
    assert_eq!(mock.calls_to(Endpoint::Users), 13);
}

#[tokio::test]
async fn test_unauthorized_users_still_produce_a_record() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());
    mock.deny(Endpoint::Users);

    let outcome = UserScenario::new("users-denied", 4, 2)
        .run(&env(&dir, &mock))
        .await
        .unwrap();

    assert_eq!(outcome.record.float("create_errors"), Some(4.0));
    assert_eq!(outcome.record.float("list_errors"), Some(1.0));
    assert_eq!(outcome.record.tags.get("status_class").map(String::as_str), Some("4xx"));
    assert_eq!(kpi_lines(&dir).len(), 1);
}

#[tokio::test]
async fn test_health_and_me_probes() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());
    mock.deny(Endpoint::Me);

    let health = ProbeScenario::new("health", ProbeKind::Health, 2, StopCondition::Count { total: 20 })
        .run(&env(&dir, &mock))
        .await
        .unwrap();
    assert_eq!(health.record.measurement, HEALTH_MEASUREMENT);
    assert_eq!(health.record.float("total_requests"), Some(20.0));
    assert_eq!(health.record.float("error_rate"), Some(0.0));
    assert_eq!(mock.calls_to(Endpoint::Health), 20);

    let me = ProbeScenario::new("me", ProbeKind::Me, 1, StopCondition::Count { total: 3 })
        .run(&env(&dir, &mock))
        .await
        .unwrap();
    assert_eq!(me.record.measurement, ME_MEASUREMENT);
    assert_eq!(me.record.float("error_count"), Some(3.0));
    assert_eq!(me.record.tags.get("status_class").map(String::as_str), Some("4xx"));
    assert_eq!(kpi_lines(&dir).len(), 2);
}

#[tokio::test]
async fn test_cleanup_removes_what_the_ledger_recorded() {
    let dir = TempDir::new().unwrap();
    let mock = Arc::new(MockInfluxApi::new());
    let bench_env = env(&dir, &mock);
    MultiWriteScenario::new("multi-cleanup", spec(5, 1, 2), BucketSet::new("tmp", 2).unwrap())
        .run(&bench_env)
        .await
        .unwrap();
    assert_eq!(mock.point_count("tmp_0"), 10);

    let summary = CleanupScenario::new(SUT, CleanupMode::DeleteData)
        .dry_run(false)
        .run(&bench_env.api, &bench_env.ledger)
        .await
        .unwrap();
    assert_eq!(summary.deleted, 2);
    assert_eq!(mock.point_count("tmp_0"), 0);
    assert_eq!(mock.point_count("tmp_1"), 0);

    let summary = CleanupScenario::new(SUT, CleanupMode::DeleteBuckets)
        .dry_run(false)
        .run(&bench_env.api, &bench_env.ledger)
        .await
        .unwrap();
    assert_eq!(summary.deleted, 2);
    assert!(mock.bucket_names().is_empty());
    assert!(bench_env.ledger.read().await.unwrap().buckets(SUT).is_empty());
}
