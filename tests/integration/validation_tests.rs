use xrules::externs::TypeId;
use xrules::{DiagnosticKind, EngineConfig, ExecutionRequest, Rule};

use super::helpers::{text_of, Calls, Fixture};

#[test]
fn test_ambiguous_rules_fail_finalize() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let a = fixture.wrap("a", "Str", &calls);
    let b = fixture.wrap("b", "Str", &calls);
    fixture
        .register(Rule::builder("to_str_a", "Str").select("Int").body(a))
        .register(Rule::builder("to_str_b", "Str").select("Int").body(b));
    fixture.registry.query("Str", ["Int"]);

    let Err(err) = fixture.registry.finalize() else {
        panic!("expected ambiguity");
    };
    assert_eq!(err.kinds(), vec![DiagnosticKind::Ambiguous]);
    let rendered = err.to_string();
    assert!(rendered.contains("to_str_a(Int) -> Str"), "{}", rendered);
    assert!(rendered.contains("to_str_b(Int) -> Str"), "{}", rendered);
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_all_problems_are_reported_together() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let a = fixture.wrap("a", "A", &calls);
    let b = fixture.wrap("b", "B", &calls);
    let c = fixture.wrap("c", "C", &calls);
    fixture
        .register(Rule::builder("needs_missing", "A").select("Missing").body(a))
        .register(Rule::builder("b_from_c", "B").select("C").body(b))
        .register(Rule::builder("c_from_b", "C").select("B").body(c));
    fixture.registry.query("A", ["Int"]).query("B", ["Int"]);

    let Err(err) = fixture.registry.finalize() else {
        panic!("expected validation errors");
    };
    let mut kinds = err.kinds();
    kinds.sort_by_key(|k| k.to_string());
    assert_eq!(
        kinds,
        vec![DiagnosticKind::Cyclic, DiagnosticKind::Unsatisfiable]
    );
}

#[tokio::test]
async fn test_priority_and_param_preference_at_runtime() {
    let low_calls = Calls::default();
    let high_calls = Calls::default();
    let mut fixture = Fixture::new();
    let low = fixture.wrap("low", "Str", &low_calls);
    let high = fixture.wrap("high", "Str", &high_calls);
    fixture
        .register(Rule::builder("low", "Str").select("Int").body(low))
        .register(Rule::builder("high", "Str").select("Int").priority(10).body(high));
    fixture.registry.query("Str", ["Int"]).query("Str", ["Str"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());

    let session = scheduler.create_session("priority");
    let request = ExecutionRequest::new()
        .root("Str", [externs.store_int(&TypeId::new("Int"), 1)])
        .root("Str", [externs.store_str(&TypeId::new("Str"), "given")]);
    let results = scheduler.execute(&session, &request).await.unwrap();
    assert_eq!(text_of(&results[0]), "1");
    assert_eq!(text_of(&results[1]), "given");
    assert_eq!(high_calls.get(), 1);
    assert_eq!(low_calls.get(), 0);
}

#[tokio::test]
async fn test_graph_visualizations() {
    let calls = Calls::default();
    let mut fixture = Fixture::new();
    let base = fixture.wrap("base", "Base", &calls);
    let top = fixture.wrap("top", "Top", &calls);
    let orphan = fixture.wrap("orphan", "Orphan", &calls);
    fixture
        .register(Rule::builder("base", "Base").select("Int").body(base))
        .register(Rule::builder("top", "Top").select("Base").body(top))
        .register(Rule::builder("orphan", "Orphan").select("Int").body(orphan));
    fixture.registry.query("Top", ["Int"]);
    let (scheduler, externs, _host) = fixture.scheduler(EngineConfig::default());
    assert_eq!(
        scheduler
            .core()
            .rule_graph
            .unreachable_rules()
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>(),
        vec!["orphan"]
    );

    let mut rules_dot = Vec::new();
    scheduler.visualize_rule_graph(&mut rules_dot).unwrap();
    let rules_dot = String::from_utf8(rules_dot).unwrap();
    assert!(rules_dot.starts_with("digraph"));
    assert!(rules_dot.contains("top(Base) -> Top"));
    assert!(rules_dot.contains("base(Int) -> Base"));
    assert!(!rules_dot.contains("orphan"));

    let session = scheduler.create_session("dot");
    let request = ExecutionRequest::new().root("Top", [externs.store_int(&TypeId::new("Int"), 2)]);
    scheduler.execute(&session, &request).await.unwrap();

    let mut nodes_dot = Vec::new();
    scheduler.visualize_graph(&session, &mut nodes_dot).unwrap();
    let nodes_dot = String::from_utf8(nodes_dot).unwrap();
    assert!(nodes_dot.contains("top(Int(2))"), "{}", nodes_dot);
    assert!(nodes_dot.contains("base(Int(2))"), "{}", nodes_dot);
    assert!(nodes_dot.contains("->"));
}
