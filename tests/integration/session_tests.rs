use std::time::{Duration, Instant};

use xrules::externs::TypeId;
use xrules::{EngineConfig, EngineError, ExecutionRequest, Failure, ProcessSpec, Rule, Types};

use super::helpers::{text_of, with_timeout, Calls, Fixture};

#[tokio::test]
async fn test_cancel_aborts_in_flight_roots() {
    let calls = Calls::default();
    let mut fixture = Fixture::with_intrinsics();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture
        .registry
        .query("ProcessResult", ["Process"])
        .query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let process_type = Types::default().process;
    let sleep = ProcessSpec::new(["sh", "-c", "sleep 5"]).to_value(&externs, &process_type);
    let session = scheduler.create_session("cancel");
    let request = ExecutionRequest::new().root("ProcessResult", [sleep]);

    let started = Instant::now();
    let (results, _) = with_timeout("cancelled request", Duration::from_secs(4), async {
        tokio::join!(scheduler.execute(&session, &request), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            session.cancel();
        })
    })
    .await;
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(results.unwrap()[0], Err(Failure::Cancelled)));
    assert!(session.is_cancelled());

    // An isolated clone has its own cancellation.
    let other = session.isolated_clone("other");
    assert!(!other.is_cancelled());
    let request = ExecutionRequest::new().root("Str", [externs.store_int(&TypeId::new("Int"), 9)]);
    let results = scheduler.execute(&other, &request).await.unwrap();
    assert_eq!(text_of(&results[0]), "9");
}

#[tokio::test]
async fn test_cancel_all_sessions() {
    let scheduler_fixture = Fixture::new();
    let (scheduler, _externs, _host) = scheduler_fixture.scheduler(EngineConfig::default());
    let a = scheduler.create_session("a");
    let b = scheduler.create_session("b");
    assert_eq!(scheduler.core().sessions.len(), 2);

    scheduler.cancel_all_sessions();
    assert!(a.is_cancelled());
    assert!(b.is_cancelled());

    drop(a);
    assert_eq!(scheduler.core().sessions.len(), 1);
}

#[tokio::test]
async fn test_uncacheable_rules_rerun_per_run_id() {
    let stamp_calls = Calls::default();
    let wrap_calls = Calls::default();
    let plain_calls = Calls::default();
    let mut fixture = Fixture::new();
    let stamp = fixture.wrap("stamp", "Stamp", &stamp_calls);
    let wrap = fixture.wrap("wrapped", "Wrapped", &wrap_calls);
    let plain = fixture.wrap("plain", "Plain", &plain_calls);
    fixture
        .register(
            Rule::builder("stamp", "Stamp")
                .select("Int")
                .cacheable(false)
                .body(stamp),
        )
        .register(Rule::builder("wrapped", "Wrapped").select("Stamp").body(wrap))
        .register(Rule::builder("plain", "Plain").select("Int").body(plain));
    fixture
        .registry
        .query("Wrapped", ["Int"])
        .query("Plain", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let int = TypeId::new("Int");
    let request = ExecutionRequest::new()
        .root("Wrapped", [externs.store_int(&int, 1)])
        .root("Plain", [externs.store_int(&int, 1)]);
    let session = scheduler.create_session("runs");

    scheduler.execute(&session, &request).await.unwrap();
    scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(stamp_calls.get(), 1);
    assert_eq!(wrap_calls.get(), 1);

    let first_run = session.run_id();
    let next_run = session.new_run_id();
    assert_ne!(first_run, next_run);

    let results = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(text_of(&results[0]), "1");
    assert_eq!(stamp_calls.get(), 2);
    // Depends on a run-scoped node, so it is run-scoped too.
    assert_eq!(wrap_calls.get(), 2);
    assert_eq!(plain_calls.get(), 1);
}

#[tokio::test]
async fn test_root_without_query_fails_before_execution() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("no-query");
    let request = ExecutionRequest::new()
        .root("Str", [externs.store_int(&TypeId::new("Int"), 1)])
        .root("Str", [externs.store_str(&TypeId::new("Name"), "x")]);
    match scheduler.execute(&session, &request).await {
        Err(EngineError::NoQuery { product, params }) => {
            assert_eq!(product, "Str");
            assert_eq!(params, "Name");
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected NoQuery"),
    }
    assert_eq!(calls.get(), 0);
    assert_eq!(scheduler.graph_len(), 0);
}

#[tokio::test]
async fn test_root_satisfied_by_a_param() {
    let mut fixture = Fixture::new();
    fixture.registry.query("Int", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("param");
    let request = ExecutionRequest::new().root("Int", [externs.store_int(&TypeId::new("Int"), 4)]);
    let results = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(text_of(&results[0]), "4");
    assert_eq!(scheduler.graph_len(), 0);
}

#[tokio::test]
async fn test_failed_root_does_not_affect_siblings() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let counted = calls.clone();
    let picky = fixture.host.simple_function("picky", move |externs, args| {
        counted.hit();
        match args[0].as_i64() {
            Some(0) => Err("zero".to_string()),
            Some(n) => Ok(externs.store_str(&TypeId::new("Str"), n.to_string())),
            None => Err("not an int".to_string()),
        }
    });
    fixture.register(Rule::builder("picky", "Str").select("Int").body(picky));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let int = TypeId::new("Int");
    let session = scheduler.create_session("siblings");
    let request = ExecutionRequest::new()
        .root("Str", [externs.store_int(&int, 0)])
        .root("Str", [externs.store_int(&int, 1)]);
    let results = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().err().map(|f| f.to_string()), Some("zero".to_string()));
    assert_eq!(text_of(&results[1]), "1");
    assert_eq!(calls.get(), 2);
}
