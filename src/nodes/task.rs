//! Driving rule bodies.
//!
//! A body is called with its selected values and either returns, raises, or
//! hands back a generator. A generator is stepped until it breaks or throws;
//! every Get it yields is resolved through the rule graph edges of the running
//! entry, and the result (or the failure, raised as an exception) is sent back
//! in at the same suspension point.

use std::fmt;
use std::hash::{Hash, Hasher};

use futures::future;
use tracing::debug;

use super::{intrinsics, NodeKey, Params};
use crate::core::Context;
use crate::error::{Failure, NodeResult};
use crate::externs::{CallResult, Get, GetMulti, GeneratorInput, GeneratorResponse, Key, Value};
use crate::rules::{DependencyKey, EntryId, RuleBody, RuleId, Source};

/// A rule applied to the params it uses.
#[derive(Clone)]
pub struct Task {
    pub(crate) rule: RuleId,
    pub(crate) entry: EntryId,
    pub(crate) params: Params,
}

impl Task {
    pub fn rule(&self) -> &RuleId {
        &self.rule
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The node computing `entry` for `params`, restricted to the params it uses.
    pub(crate) fn node(ctx: &Context, entry: EntryId, params: &Params) -> NodeKey {
        let rule_graph = &ctx.core().rule_graph;
        NodeKey::Task(Box::new(Task {
            rule: rule_graph.rule(entry).id.clone(),
            entry,
            params: params.restrict(&rule_graph.entry(entry).used),
        }))
    }

    pub(crate) async fn run(self, ctx: Context) -> NodeResult<Value> {
        let rule_graph = ctx.core().rule_graph.clone();
        let rule = rule_graph.rule(self.entry);
        if !rule.cacheable {
            ctx.mark_run_scoped();
        }

        let result: NodeResult<Value> = async {
            let args = future::try_join_all(rule.selects.iter().map(|product| {
                self.resolve(&ctx, DependencyKey::select(product.clone()), self.params.clone())
            }))
            .await?;

            ctx.session().metrics().record_rule_invocation();
            let value = match &rule.body {
                RuleBody::Intrinsic(intrinsic) => intrinsics::run(&ctx, *intrinsic, args).await?,
                RuleBody::Host(func) => {
                    debug!(rule = %rule.id, params = %self.params, "Invoking rule");
                    match ctx.externs().call(func, args) {
                        CallResult::Return(value) => value,
                        CallResult::Throw(exc) => return Err(Failure::from_exception(exc)),
                        CallResult::Generator(generator) => self.generate(&ctx, generator).await?,
                    }
                }
            };

            let actual = value.type_id();
            if actual != rule.product {
                return Err(Failure::throw(
                    ctx.externs(),
                    format!(
                        "Incorrect product: {} returned {} where {} was declared",
                        rule.id, actual, rule.product
                    ),
                ));
            }
            Ok(value)
        }
        .await;

        result.map_err(|failure| failure.with_frame(rule.id.as_str()))
    }

    async fn generate(&self, ctx: &Context, generator: Value) -> NodeResult<Value> {
        let externs = ctx.externs();
        let mut input = GeneratorInput::Initial;
        // The last failure raised into the body, and the exception it was raised as.
        let mut raised: Option<(Failure, Value)> = None;

        loop {
            let response = externs.generator_send(&generator, input);
            input = match response {
                GeneratorResponse::Get(get) => match self.resolve_get(ctx, get).await {
                    Ok(value) => GeneratorInput::Arg(value),
                    Err(failure) => raise(ctx, failure, &mut raised)?,
                },
                GeneratorResponse::GetMulti(multi) => match self.resolve_multi(ctx, multi).await {
                    Ok(values) => GeneratorInput::Arg(externs.store_tuple(values)),
                    Err(failure) => raise(ctx, failure, &mut raised)?,
                },
                GeneratorResponse::Break(value) => return Ok(value),
                GeneratorResponse::Throw(exc) => {
                    return Err(match raised.take() {
                        Some((failure, sent)) if sent == exc => failure,
                        _ => Failure::from_exception(exc),
                    });
                }
            };
        }
    }

    async fn resolve_multi(&self, ctx: &Context, multi: GetMulti) -> NodeResult<Vec<Value>> {
        let GetMulti { gets, partial } = multi;
        let requests = gets.into_iter().map(|get| self.resolve_get(ctx, get));
        if !partial {
            return future::try_join_all(requests).await;
        }
        let mut values = Vec::new();
        for result in future::join_all(requests).await {
            match result {
                Ok(value) => values.push(value),
                Err(failure) if failure.is_catchable() => {
                    values.push(failure.to_exception(ctx.externs()))
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(values)
    }

    async fn resolve_get(&self, ctx: &Context, get: Get) -> NodeResult<Value> {
        let key = DependencyKey::new(get.product.clone(), get.inputs.iter().map(Value::type_id));
        if let Some(repeated) = key.repeated_input() {
            return Err(Failure::throw(
                ctx.externs(),
                format!("{} has more than one input of type {}", key, repeated),
            ));
        }
        let mut params = self.params.clone();
        for input in get.inputs {
            params.put(Key::new(input));
        }
        self.resolve(ctx, key, params).await
    }

    async fn resolve(&self, ctx: &Context, key: DependencyKey, params: Params) -> NodeResult<Value> {
        let source = ctx.core().rule_graph.edge(self.entry, &key).cloned();
        match source {
            Some(Source::Param(type_id)) => params
                .find(&type_id)
                .map(|k| k.value().clone())
                .ok_or_else(|| Failure::throw(ctx.externs(), format!("Missing param {}", type_id))),
            Some(Source::Rule(entry)) => ctx.get(Task::node(ctx, entry, &params)).await,
            None => Err(Failure::throw(
                ctx.externs(),
                format!("{} did not declare a dependency on {}", self.rule, key),
            )),
        }
    }
}

/// Raise a catchable failure into the body; anything else aborts it.
fn raise(
    ctx: &Context,
    failure: Failure,
    raised: &mut Option<(Failure, Value)>,
) -> NodeResult<GeneratorInput> {
    if !failure.is_catchable() {
        return Err(failure);
    }
    let exc = failure.to_exception(ctx.externs());
    *raised = Some((failure, exc.clone()));
    Ok(GeneratorInput::Err(exc))
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.rule == other.rule && self.params == other.params
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule.hash(state);
        self.params.hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.rule, self.params)
    }
}
