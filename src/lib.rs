//! # xrules: a memoized, incrementally invalidated rule engine
//!
//! `xrules` is the computation core of a monorepo build system. Products are
//! computed by composing small, independently registered rules into a
//! dependency graph that is discovered on demand:
//!
//! - **Static validation**: every query is proven reachable, unambiguous and
//!   free of static cycles before anything runs.
//! - **Memoization**: each node runs at most once until invalidated, and
//!   concurrent requesters share the same in-flight run.
//! - **Suspend/resume**: rule bodies are host generators that yield `Get`
//!   requests and resume with the values, or with the failure raised inside.
//! - **Invalidation**: file changes evict the affected nodes and everything
//!   that depended on them; unrelated nodes keep their results.
//! - **Sessions**: cancellable invocation scopes sharing one graph, with run
//!   scoped memoization for uncacheable rules.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xrules::{
//!     EngineConfig, ExecutionRequest, MemoryStore, NativeHost, Rule, RuleRegistry, Scheduler,
//! };
//! use xrules::externs::TypeId;
//!
//! #[tokio::main]
//! async fn main() {
//!     let host = NativeHost::new();
//!     let externs = host.externs();
//!     let to_str = host.simple_function("int_to_str", |externs, args| {
//!         let i = args[0].as_i64().ok_or("not an int")?;
//!         Ok(externs.store_str(&TypeId::new("Str"), i.to_string()))
//!     });
//!
//!     let mut registry = RuleRegistry::new();
//!     registry
//!         .register(Rule::builder("int_to_str", "Str").select("Int").body(to_str))
//!         .unwrap();
//!     registry.query("Str", ["Int"]);
//!     let rule_graph = registry.finalize().unwrap();
//!
//!     let scheduler = Scheduler::new(
//!         rule_graph,
//!         externs.clone(),
//!         Arc::new(MemoryStore::new()),
//!         EngineConfig::default(),
//!     );
//!     let session = scheduler.create_session("example");
//!     let request = ExecutionRequest::new()
//!         .root("Str", [externs.store_int(&TypeId::new("Int"), 42)]);
//!     let results = scheduler.execute(&session, &request).await.unwrap();
//!     println!("{}", results[0].as_ref().unwrap());
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`rules`] | Rule registration, static validation, the rule graph |
//! | [`graph`] | Memoized node entries, invalidation, leases and GC |
//! | [`nodes`] | Node identities, the rule body driver, intrinsic rules |
//! | [`core`] | Shared engine state, sessions and node contexts |
//! | [`scheduler`] | Execution requests |
//! | [`externs`] | The host-callback boundary and the native host |
//! | [`store`] | Content-addressed storage |
//! | [`config`] | Engine configuration |
//! | [`error`] | Error and failure types |

pub mod config;
pub mod core;
pub mod error;
pub mod externs;
pub mod graph;
pub mod nodes;
pub mod rules;
pub mod scheduler;
pub mod store;

pub use crate::config::{parse_config, ConfigFormat, EngineConfig};
pub use crate::core::{RunId, Session, SessionMetrics};
pub use crate::error::{
    Diagnostic, DiagnosticKind, EngineError, EngineResult, Failure, NodeResult, StoreError,
    ValidationError,
};
pub use crate::externs::{Externs, Host, NativeHost, Value};
pub use crate::graph::{Graph, InvalidationResult, Lease};
pub use crate::nodes::{NodeKey, ProcessSpec};
pub use crate::rules::{Intrinsic, Rule, RuleGraph, RuleRegistry, Types};
pub use crate::scheduler::{ExecutionRequest, Scheduler};
pub use crate::store::{Digest, MemoryStore, Store};
