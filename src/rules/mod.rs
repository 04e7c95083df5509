//! Rule registration and static validation.
//!
//! Rules are collected by a [`RuleRegistry`] together with the queries the
//! scheduler will be asked to answer. [`RuleRegistry::finalize`] proves that
//! every query is satisfiable, unambiguous and free of static cycles, and
//! produces the [`RuleGraph`] the runtime follows.

mod builder;
pub mod registry;
pub mod rule;
pub mod rule_graph;

pub use registry::RuleRegistry;
pub use rule::{DependencyKey, Intrinsic, ParamTypes, Rule, RuleBody, RuleBuilder, RuleId, Types};
pub use rule_graph::{EntryId, Query, RuleEntry, RuleGraph, Source};
