use std::time::Duration;

use futures::future;
use xrules::externs::{GeneratorInput, GeneratorResponse, Get, GetMulti, StepFn, TypeId};
use xrules::{EngineConfig, ExecutionRequest, Rule};

use super::helpers::{text_of, with_timeout, Calls, Fixture};

#[tokio::test]
async fn test_int_to_str_is_memoized() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("memo");
    let request =
        ExecutionRequest::new().root("Str", [externs.store_int(&TypeId::new("Int"), 5)]);

    let first = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(text_of(&first[0]), "5");
    let second = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(text_of(&second[0]), "5");

    assert_eq!(calls.get(), 1);
    assert_eq!(session.metrics().rule_invocations(), 1);
    assert_eq!(session.metrics().cache_hits(), 1);
}

#[tokio::test]
async fn test_equal_params_share_a_node() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());
    let int = TypeId::new("Int");

    // Distinct handles, equal values.
    let request = ExecutionRequest::new()
        .root("Str", [externs.store_int(&int, 7)])
        .root("Str", [externs.store_int(&int, 7)])
        .root("Str", [externs.store_int(&int, 8)]);
    let session = scheduler.create_session("equal");
    let results = scheduler.execute(&session, &request).await.unwrap();

    let texts: Vec<String> = results.iter().map(text_of).collect();
    assert_eq!(texts, vec!["7", "7", "8"]);
    assert_eq!(calls.get(), 2);
    assert_eq!(scheduler.graph_len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_run_once() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let counted = calls.clone();
    let slow = fixture.host.simple_function("slow", move |externs, args| {
        counted.hit();
        std::thread::sleep(Duration::from_millis(100));
        Ok(externs.store_str(&TypeId::new("Str"), args[0].to_string()))
    });
    fixture.register(Rule::builder("slow", "Str").select("Int").body(slow));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let sessions: Vec<_> = (0..8)
        .map(|i| scheduler.create_session(format!("client-{}", i)))
        .collect();
    let requests: Vec<_> = (0..8)
        .map(|_| ExecutionRequest::new().root("Str", [externs.store_int(&TypeId::new("Int"), 1)]))
        .collect();

    let results = with_timeout(
        "concurrent requests",
        Duration::from_secs(10),
        future::join_all(
            sessions
                .iter()
                .zip(&requests)
                .map(|(session, request)| scheduler.execute(session, request)),
        ),
    )
    .await;

    for result in results {
        assert_eq!(text_of(&result.unwrap()[0]), "1");
    }
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_shared_sub_rule_runs_once_across_roots() {
    let base_calls = Calls::default();
    let other_calls = Calls::default();
    let mut fixture = Fixture::new();
    let base = fixture.wrap("base", "Base", &base_calls);
    let left = fixture.wrap("left", "Left", &other_calls);
    let right = fixture.wrap("right", "Right", &other_calls);
    fixture
        .register(Rule::builder("base", "Base").select("Int").body(base))
        .register(Rule::builder("left", "Left").select("Base").body(left))
        .register(Rule::builder("right", "Right").select("Base").body(right));
    fixture.registry.query("Left", ["Int"]).query("Right", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let int = TypeId::new("Int");
    let request = ExecutionRequest::new()
        .root("Left", [externs.store_int(&int, 3)])
        .root("Right", [externs.store_int(&int, 3)]);
    let session = scheduler.create_session("shared");
    let results = scheduler.execute(&session, &request).await.unwrap();

    assert_eq!(text_of(&results[0]), "3");
    assert_eq!(text_of(&results[1]), "3");
    assert_eq!(base_calls.get(), 1);
    assert_eq!(other_calls.get(), 2);
}

#[tokio::test]
async fn test_recursive_gets_over_different_params() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let counted = calls.clone();
    let fib = fixture.host.generator_function("fib", move |_, args| {
        counted.hit();
        let n = args[0].as_i64().unwrap_or(0);
        StepFn(move |externs: &xrules::Externs, input: GeneratorInput| {
            let fib = TypeId::new("Fib");
            let int = TypeId::new("Int");
            match input {
                GeneratorInput::Initial if n < 2 => {
                    GeneratorResponse::Break(externs.store_int(&fib, n))
                }
                GeneratorInput::Initial => GeneratorResponse::GetMulti(GetMulti::new(vec![
                    Get::new("Fib", vec![externs.store_int(&int, n - 1)]),
                    Get::new("Fib", vec![externs.store_int(&int, n - 2)]),
                ])),
                GeneratorInput::Arg(pair) => {
                    let sum = pair
                        .as_tuple()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|v| v.as_i64())
                        .sum::<i64>();
                    GeneratorResponse::Break(externs.store_int(&fib, sum))
                }
                GeneratorInput::Err(exc) => GeneratorResponse::Throw(exc),
            }
        })
    });
    fixture.register(
        Rule::builder("fib", "Fib")
            .select("Int")
            .get("Fib", ["Int"])
            .body(fib),
    );
    fixture.registry.query("Fib", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("fib");
    let request =
        ExecutionRequest::new().root("Fib", [externs.store_int(&TypeId::new("Int"), 10)]);
    let results = with_timeout(
        "fib",
        Duration::from_secs(10),
        scheduler.execute(&session, &request),
    )
    .await
    .unwrap();

    assert_eq!(results[0].as_ref().unwrap().as_i64(), Some(55));
    // One node per distinct n in 0..=10.
    assert_eq!(calls.get(), 11);
}
