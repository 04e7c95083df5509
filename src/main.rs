use std::sync::Arc;

use xrules::externs::{
    Externs, GeneratorInput, GeneratorResponse, Get, GetMulti, NativeHost, StepFn, TypeId, Value,
};
use xrules::{
    EngineConfig, ExecutionRequest, MemoryStore, Rule, RuleRegistry, Scheduler, Types,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== xrules engine ===\n");

    let build_root = std::env::temp_dir().join(format!("xrules-demo-{}", std::process::id()));
    tokio::fs::create_dir_all(&build_root)
        .await
        .expect("Failed to create build root");
    tokio::fs::write(build_root.join("a.txt"), "A")
        .await
        .expect("Failed to write a.txt");
    tokio::fs::write(build_root.join("b.txt"), "B")
        .await
        .expect("Failed to write b.txt");

    let host = NativeHost::new();
    let externs = host.externs();

    let int_to_str = host.simple_function("int_to_str", |externs, args| {
        let n = args[0].as_i64().ok_or("expected an Int")?;
        Ok(externs.store_str(&TypeId::new("Str"), n.to_string()))
    });

    let concat = host.generator_function("concat", |_, args| {
        let files = args.into_iter().next();
        StepFn(move |externs: &Externs, input: GeneratorInput| match input {
            GeneratorInput::Initial => {
                let paths = files
                    .as_ref()
                    .and_then(|f| f.field("paths"))
                    .and_then(|p| p.as_tuple())
                    .unwrap_or_default();
                let gets = paths
                    .into_iter()
                    .map(|path| {
                        let path = externs.store_dict(&TypeId::new("Path"), [("path".to_string(), path)]);
                        Get::new("FileContent", vec![path])
                    })
                    .collect();
                GeneratorResponse::GetMulti(GetMulti::new(gets))
            }
            GeneratorInput::Arg(contents) => {
                let mut out = String::new();
                for content in contents.as_tuple().unwrap_or_default() {
                    let bytes = content
                        .field("content")
                        .and_then(|c| c.as_bytes())
                        .unwrap_or_default();
                    out.push_str(&String::from_utf8_lossy(&bytes));
                }
                GeneratorResponse::Break(externs.store_str(&TypeId::new("Str"), out))
            }
            GeneratorInput::Err(exc) => GeneratorResponse::Throw(exc),
        })
    });

    let mut registry = RuleRegistry::new();
    registry
        .register_intrinsics(Types::default())
        .expect("Failed to register intrinsics");
    registry
        .register(Rule::builder("int_to_str", "Str").select("Int").body(int_to_str))
        .expect("Failed to register int_to_str");
    registry
        .register(
            Rule::builder("concat", "Str")
                .select("Files")
                .get("FileContent", ["Path"])
                .body(concat),
        )
        .expect("Failed to register concat");
    registry.query("Str", ["Int"]).query("Str", ["Files"]);

    let rule_graph = registry.finalize().expect("Rule graph validation failed");
    println!("[OK] Rule graph validated ({} entries)", rule_graph.entry_count());
    for rule in rule_graph.unreachable_rules() {
        println!("[WARN] Unreachable rule: {}", rule);
    }

    let scheduler = Scheduler::new(
        rule_graph,
        externs.clone(),
        Arc::new(MemoryStore::new()),
        EngineConfig::default().with_build_root(build_root.clone()),
    );
    let session = scheduler.create_session("demo");

    let files = externs.store_dict(
        &TypeId::new("Files"),
        [(
            "paths".to_string(),
            externs.store_tuple(vec![
                externs.store_str(&TypeId::str(), "a.txt"),
                externs.store_str(&TypeId::str(), "b.txt"),
            ]),
        )],
    );
    let request = ExecutionRequest::new()
        .root("Str", [externs.store_int(&TypeId::new("Int"), 5)])
        .root("Str", [files]);

    print_results("First run", &scheduler.execute(&session, &request).await.expect("execute"));

    tokio::fs::write(build_root.join("a.txt"), "Z")
        .await
        .expect("Failed to edit a.txt");
    let invalidated = scheduler.invalidate_paths(&["a.txt"]);
    println!("\n[OK] Invalidated {} node(s) after editing a.txt", invalidated);

    print_results("Second run", &scheduler.execute(&session, &request).await.expect("execute"));

    let metrics = session.metrics();
    println!(
        "\nrule invocations = {}, cache hits = {}, graph size = {}",
        metrics.rule_invocations(),
        metrics.cache_hits(),
        scheduler.graph_len()
    );

    let _ = tokio::fs::remove_dir_all(&build_root).await;
}

fn print_results(title: &str, results: &[xrules::NodeResult<Value>]) {
    println!("\n=== {} ===", title);
    for result in results {
        match result {
            Ok(value) => println!("  {}", value),
            Err(failure) => println!("  failed: {}", failure.render()),
        }
    }
}
