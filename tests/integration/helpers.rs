#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xrules::externs::{
    Externs, GeneratorInput, GeneratorResponse, Get, GetMulti, NativeHost, StepFn, TypeId, Value,
};
use xrules::{
    EngineConfig, MemoryStore, NodeResult, Rule, RuleGraph, RuleRegistry, Scheduler, Types,
};

pub async fn with_timeout<F, T>(label: &str, duration: Duration, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, f)
        .await
        .unwrap_or_else(|_| panic!("'{}' timed out after {:?}", label, duration))
}

/// Counts how often a rule body was entered.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Fixture {
    pub host: Arc<NativeHost>,
    pub externs: Externs,
    pub registry: RuleRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let host = NativeHost::new();
        let externs = host.externs();
        Fixture {
            host,
            externs,
            registry: RuleRegistry::new(),
        }
    }

    pub fn with_intrinsics() -> Self {
        let mut fixture = Self::new();
        fixture
            .registry
            .register_intrinsics(Types::default())
            .unwrap();
        fixture
    }

    pub fn register(&mut self, rule: Rule) -> &mut Self {
        self.registry.register(rule).unwrap();
        self
    }

    pub fn int(&self, type_name: &str, n: i64) -> Value {
        self.externs.store_int(&TypeId::new(type_name), n)
    }

    pub fn text(&self, type_name: &str, s: &str) -> Value {
        self.externs.store_str(&TypeId::new(type_name), s)
    }

    /// `int_to_str: Int -> Str`, counting invocations.
    pub fn int_to_str(&self, calls: &Calls) -> Value {
        let calls = calls.clone();
        self.host.simple_function("int_to_str", move |externs, args| {
            calls.hit();
            let n = args[0].as_i64().ok_or("expected an Int")?;
            Ok(externs.store_str(&TypeId::new("Str"), n.to_string()))
        })
    }

    /// A body that wraps its first argument's rendering in a value of `product`.
    pub fn wrap(&self, name: &str, product: &str, calls: &Calls) -> Value {
        let calls = calls.clone();
        let product = TypeId::new(product);
        self.host.simple_function(name, move |externs, args| {
            calls.hit();
            Ok(externs.store_str(&product, args[0].to_string()))
        })
    }

    /// `concat: Files -> Str`, reading every path of `Files(paths=...)` through
    /// a GetMulti of FileContent.
    pub fn concat(&self, calls: &Calls) -> Value {
        let calls = calls.clone();
        self.host.generator_function("concat", move |_, args| {
            calls.hit();
            let files = args.into_iter().next();
            StepFn(move |externs: &Externs, input: GeneratorInput| match input {
                GeneratorInput::Initial => {
                    let gets = files
                        .as_ref()
                        .and_then(|f| f.field("paths"))
                        .and_then(|p| p.as_tuple())
                        .unwrap_or_default()
                        .into_iter()
                        .map(|path| Get::new("FileContent", vec![path_value(externs, path)]))
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
        })
    }

    pub fn files(&self, paths: &[&str]) -> Value {
        let paths = paths
            .iter()
            .map(|p| self.externs.store_str(&TypeId::str(), *p))
            .collect();
        self.externs.store_dict(
            &TypeId::new("Files"),
            [("paths".to_string(), self.externs.store_tuple(paths))],
        )
    }

    pub fn finalize(self) -> (Arc<NativeHost>, Externs, RuleGraph) {
        let rule_graph = self.registry.finalize().unwrap();
        (self.host, self.externs, rule_graph)
    }

    pub fn scheduler(self, config: EngineConfig) -> (Scheduler, Externs, Arc<NativeHost>) {
        let (host, externs, rule_graph) = self.finalize();
        let scheduler = Scheduler::new(
            rule_graph,
            externs.clone(),
            Arc::new(MemoryStore::new()),
            config,
        );
        (scheduler, externs, host)
    }
}

pub fn path_value(externs: &Externs, path: Value) -> Value {
    externs.store_dict(&TypeId::new("Path"), [("path".to_string(), path)])
}

pub fn config_in(build_root: &Path) -> EngineConfig {
    EngineConfig::default().with_build_root(build_root.to_path_buf())
}

pub fn text_of(result: &NodeResult<Value>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(failure) => panic!("expected a value, got failure: {}", failure.render()),
    }
}

#[test]
fn test_helper_smoke() {
    let calls = Calls::default();
    calls.hit();
    assert_eq!(calls.get(), 1);

    let fixture = Fixture::new();
    assert_eq!(fixture.int("Int", 3).to_string(), "3");
    assert_eq!(
        fixture.files(&["a.txt"]).to_string(),
        "Files(paths=(a.txt))"
    );
}
