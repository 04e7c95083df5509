use std::collections::HashMap;

use tracing::debug;

use super::builder::Builder;
use super::rule::{Intrinsic, ParamTypes, Rule, RuleId, Types};
use super::rule_graph::{Query, RuleGraph};
use crate::error::{EngineError, ValidationError};
use crate::externs::TypeId;

/// Collects rules and queries, then validates them into a [`RuleGraph`].
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
    by_id: HashMap<RuleId, usize>,
    queries: Vec<Query>,
    types: Types,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: Rule) -> Result<RuleId, EngineError> {
        if self.by_id.contains_key(&rule.id) {
            return Err(EngineError::Registration(format!(
                "duplicate rule name: {}",
                rule.id
            )));
        }
        if let Some(get) = rule.gets.iter().find(|get| get.repeated_input().is_some()) {
            return Err(EngineError::Registration(format!(
                "{} declares {} with more than one input of the same type",
                rule.id, get
            )));
        }
        debug!(rule = %rule, "Registered rule");
        let id = rule.id.clone();
        self.by_id.insert(id.clone(), self.rules.len());
        self.rules.push(rule);
        Ok(id)
    }

    /// Register `read_file: Path -> FileContent` and `run_process: Process -> ProcessResult`.
    pub fn register_intrinsics(&mut self, types: Types) -> Result<(), EngineError> {
        self.register(
            Rule::builder("read_file", types.file_content.clone())
                .select(types.path.clone())
                .intrinsic(Intrinsic::ReadFile),
        )?;
        self.register(
            Rule::builder("run_process", types.process_result.clone())
                .select(types.process.clone())
                .intrinsic(Intrinsic::RunProcess),
        )?;
        self.types = types;
        Ok(())
    }

    /// Declare a root the scheduler may be asked for.
    pub fn query<I, T>(&mut self, product: impl Into<TypeId>, params: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeId>,
    {
        let query = Query {
            product: product.into(),
            params: params.into_iter().map(Into::into).collect::<ParamTypes>(),
        };
        if !self.queries.contains(&query) {
            self.queries.push(query);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve every query and report every problem found.
    pub fn finalize(self) -> Result<RuleGraph, ValidationError> {
        Builder::new(self.rules, self.queries, self.types).build()
    }
}
