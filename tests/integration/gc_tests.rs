use std::time::Duration;

use xrules::externs::TypeId;
use xrules::{EngineConfig, ExecutionRequest, Rule};

use super::helpers::{Calls, Fixture};

fn tight_config() -> EngineConfig {
    EngineConfig {
        max_graph_entries: 1,
        root_lease_secs: 0,
        ..EngineConfig::default()
    }
}

fn int_request(externs: &xrules::Externs, n: i64) -> ExecutionRequest {
    ExecutionRequest::new().root("Str", [externs.store_int(&TypeId::new("Int"), n)])
}

#[tokio::test]
async fn test_roots_of_dropped_sessions_are_collected() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(tight_config());

    let first = scheduler.create_session("first");
    scheduler.execute(&first, &int_request(&externs, 1)).await.unwrap();
    drop(first);

    let second = scheduler.create_session("second");
    scheduler.execute(&second, &int_request(&externs, 2)).await.unwrap();
    // Collected automatically once the graph exceeded one entry.
    assert_eq!(scheduler.graph_len(), 1);
    assert_eq!(second.roots().len(), 1);
    assert!(scheduler.core().graph.entry(&second.roots()[0]).is_some());

    let third = scheduler.create_session("third");
    scheduler.execute(&third, &int_request(&externs, 1)).await.unwrap();
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn test_live_session_roots_survive_collection() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(tight_config());

    let a = scheduler.create_session("a");
    let b = scheduler.create_session("b");
    scheduler.execute(&a, &int_request(&externs, 1)).await.unwrap();
    scheduler.execute(&b, &int_request(&externs, 2)).await.unwrap();
    assert_eq!(scheduler.graph_len(), 2);
    assert_eq!(scheduler.garbage_collect(), 0);

    // A cancelled session no longer pins its roots.
    a.cancel();
    assert_eq!(scheduler.garbage_collect(), 1);
    assert_eq!(scheduler.graph_len(), 1);
}

#[tokio::test]
async fn test_leases_protect_entries() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let body = fixture.int_to_str(&calls);
    fixture.register(Rule::builder("int_to_str", "Str").select("Int").body(body));
    fixture.registry.query("Str", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(tight_config());
    let graph = scheduler.core().graph.clone();

    let leased = scheduler.create_session("leased");
    scheduler.execute(&leased, &int_request(&externs, 1)).await.unwrap();
    let key = leased.roots()[0].clone();
    let lease = graph.lease(key.clone());
    drop(leased);

    let other = scheduler.create_session("other");
    scheduler.execute(&other, &int_request(&externs, 2)).await.unwrap();
    assert!(graph.entry(&key).is_some());
    assert_eq!(scheduler.graph_len(), 2);

    drop(lease);
    assert_eq!(scheduler.garbage_collect(), 1);
    assert!(graph.entry(&key).is_none());

    // Timed leases expire on their own.
    let timed = scheduler.create_session("timed");
    scheduler.execute(&timed, &int_request(&externs, 3)).await.unwrap();
    let timed_key = timed.roots()[0].clone();
    graph.lease_for(timed_key.clone(), Duration::from_millis(50));
    drop(timed);
    assert_eq!(scheduler.garbage_collect(), 0);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(scheduler.garbage_collect(), 1);
    assert!(graph.entry(&timed_key).is_none());
}

#[tokio::test]
async fn test_leased_root_retains_its_dependencies() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let base = fixture.wrap("base", "Base", &calls);
    let top = fixture.wrap("top", "Top", &calls);
    fixture
        .register(Rule::builder("base", "Base").select("Int").body(base))
        .register(Rule::builder("top", "Top").select("Base").body(top));
    fixture.registry.query("Top", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("chain");
    let request =
        ExecutionRequest::new().root("Top", [externs.store_int(&TypeId::new("Int"), 1)]);
    scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(scheduler.graph_len(), 2);

    drop(session);
    // The root lease taken by execute covers the root and what it depends on.
    let graph = scheduler.core().graph.clone();
    assert_eq!(graph.garbage_collect(&[], 0), 0);
    assert_eq!(scheduler.graph_len(), 2);
    assert_eq!(scheduler.invalidate_all(), 2);
}
