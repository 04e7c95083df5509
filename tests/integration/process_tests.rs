use std::time::Duration;

use xrules::externs::Value;
use xrules::nodes::{ExecuteProcess, NodeKey};
use xrules::{EngineConfig, ExecutionRequest, Failure, ProcessSpec, Scheduler, Types};

use super::helpers::{with_timeout, Fixture};

fn process_scheduler(config: EngineConfig) -> (Scheduler, xrules::Externs) {
    let mut fixture = Fixture::with_intrinsics();
    fixture.registry.query("ProcessResult", ["Process"]);
    let (scheduler, externs, _host) = fixture.scheduler(config);
    (scheduler, externs)
}

fn field_text(value: &Value, field: &str) -> String {
    let bytes = value.field(field).and_then(|v| v.as_bytes()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_process_output_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, externs) =
        process_scheduler(EngineConfig::default().with_build_root(dir.path().to_path_buf()));

    let spec = ProcessSpec::new(["sh", "-c", "echo \"$GREETING\"; pwd; echo oops >&2; exit 3"])
        .env("GREETING", "hello");
    let request = ExecutionRequest::new()
        .root("ProcessResult", [spec.to_value(&externs, &Types::default().process)]);
    let session = scheduler.create_session("process");
    let results = with_timeout(
        "process",
        Duration::from_secs(10),
        scheduler.execute(&session, &request),
    )
    .await
    .unwrap();

    let result = results[0].as_ref().unwrap();
    assert_eq!(result.field("exit_code").and_then(|v| v.as_i64()), Some(3));
    let stdout = field_text(result, "stdout");
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("hello"));
    let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
    assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
    assert_eq!(field_text(result, "stderr"), "oops\n");
    assert!(result.field("stdout_digest").is_some());
}

#[tokio::test]
async fn test_process_timeout_is_not_memoized() {
    let (scheduler, externs) = process_scheduler(EngineConfig::default());

    let spec = ProcessSpec::new(["sh", "-c", "sleep 5"]).timeout(Duration::from_millis(100));
    let request = ExecutionRequest::new()
        .root("ProcessResult", [spec.to_value(&externs, &Types::default().process)]);
    let session = scheduler.create_session("timeout");

    for _ in 0..2 {
        let results = with_timeout(
            "timed out process",
            Duration::from_secs(4),
            scheduler.execute(&session, &request),
        )
        .await
        .unwrap();
        match &results[0] {
            Err(Failure::Timeout { description }) => assert!(description.contains("sleep 5")),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    // Two runs of the process node, each left retryable.
    assert_eq!(session.metrics().cache_hits(), 0);
    let entry = scheduler
        .core()
        .graph
        .entry(&NodeKey::ExecuteProcess(Box::new(ExecuteProcess { spec })))
        .unwrap();
    assert!(entry.completed_value().is_none());
    assert!(!entry.is_running());
}

#[tokio::test]
async fn test_identical_processes_run_once() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, externs) =
        process_scheduler(EngineConfig::default().with_build_root(dir.path().to_path_buf()));

    // Appends to a file on every execution.
    let spec = ProcessSpec::new(["sh", "-c", "echo run >> runs.log"]);
    let process_type = Types::default().process;
    let request = ExecutionRequest::new()
        .root("ProcessResult", [spec.to_value(&externs, &process_type)])
        .root("ProcessResult", [spec.to_value(&externs, &process_type)]);
    let session = scheduler.create_session("dedupe");
    let results = scheduler.execute(&session, &request).await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    scheduler.execute(&session, &request).await.unwrap();

    let log = std::fs::read_to_string(dir.path().join("runs.log")).unwrap();
    assert_eq!(log.lines().count(), 1);
}

#[tokio::test]
async fn test_spawn_failure_is_a_throw() {
    let (scheduler, externs) = process_scheduler(EngineConfig::default());
    let spec = ProcessSpec::new(["/nonexistent/xrules-binary"]);
    let request = ExecutionRequest::new()
        .root("ProcessResult", [spec.to_value(&externs, &Types::default().process)]);
    let session = scheduler.create_session("spawn");
    let results = scheduler.execute(&session, &request).await.unwrap();
    let failure = results[0].as_ref().err().unwrap();
    assert!(matches!(failure, Failure::Throw { .. }));
    assert!(failure.to_string().starts_with("Failed to spawn /nonexistent/xrules-binary"));
}
