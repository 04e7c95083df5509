//! Running execution requests against a validated rule graph.
//!
//! A [`Scheduler`] owns the node graph shared by all of its sessions. Each
//! [`ExecutionRequest`] names a list of roots; [`Scheduler::execute`] resolves
//! every root against the registered queries, then runs the roots
//! concurrently and returns one result per root in request order.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::future;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::{Context, Core, Session};
use crate::error::{EngineError, Failure, NodeResult};
use crate::externs::{Externs, Key, TypeId, Value};
use crate::nodes::{NodeKey, Params, Task};
use crate::rules::{RuleGraph, Source};
use crate::store::Store;

/// One root of an execution request: a product computed for some params.
#[derive(Clone)]
pub struct Root {
    pub product: TypeId,
    pub params: Params,
}

/// Ordered roots to compute in one call to [`Scheduler::execute`].
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    roots: Vec<Root>,
}

impl ExecutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root<I>(mut self, product: impl Into<TypeId>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.roots.push(Root {
            product: product.into(),
            params: Params::new(params.into_iter().map(Key::new)),
        });
        self
    }

    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// How a root is produced once resolved against the rule graph.
enum Plan {
    Value(Value),
    Node(NodeKey),
}

pub struct Scheduler {
    core: Arc<Core>,
}

impl Scheduler {
    pub fn new(
        rule_graph: RuleGraph,
        externs: Externs,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Self {
        info!(
            rule_entries = rule_graph.entry_count(),
            build_root = %config.build_root.display(),
            "Scheduler created"
        );
        Scheduler {
            core: Arc::new(Core::new(rule_graph, externs, store, config)),
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn create_session(&self, name: impl Into<String>) -> Session {
        Session::new(&self.core, name)
    }

    /// Compute every root of `request`, in order. Fails up front if a root
    /// has no registered query; otherwise each root succeeds or fails on its own.
    pub async fn execute(
        &self,
        session: &Session,
        request: &ExecutionRequest,
    ) -> Result<Vec<NodeResult<Value>>, EngineError> {
        let ctx = Context::root(session);
        let plans = request
            .roots
            .iter()
            .map(|root| self.plan(&ctx, root))
            .collect::<Result<Vec<_>, _>>()?;

        let nodes: Vec<NodeKey> = plans
            .iter()
            .filter_map(|plan| match plan {
                Plan::Node(key) => Some(key.clone()),
                Plan::Value(_) => None,
            })
            .collect();
        session.set_roots(nodes.clone());
        debug!(session = %session.name(), roots = nodes.len(), "Executing request");

        let results = future::join_all(plans.into_iter().map(|plan| {
            let ctx = ctx.clone();
            async move {
                match plan {
                    Plan::Value(value) => Ok(value),
                    Plan::Node(key) => self.run_root(&ctx, key).await,
                }
            }
        }))
        .await;

        let lease = self.core.config.root_lease();
        for key in nodes {
            self.core.graph.lease_for(key, lease);
        }
        let max_entries = self.core.config.max_graph_entries;
        if self.core.graph.len() > max_entries {
            self.garbage_collect();
        }
        Ok(results)
    }

    fn plan(&self, ctx: &Context, root: &Root) -> Result<Plan, EngineError> {
        let rule_graph = &self.core.rule_graph;
        let param_types = root.params.types();
        match rule_graph.root(&root.product, &param_types) {
            Some(Source::Param(type_id)) => root
                .params
                .find(type_id)
                .map(|key| Plan::Value(key.value().clone()))
                .ok_or_else(|| EngineError::InternalError(format!("Missing root param {}", type_id))),
            Some(Source::Rule(entry)) => Ok(Plan::Node(Task::node(ctx, *entry, &root.params))),
            None => Err(EngineError::NoQuery {
                product: root.product.to_string(),
                params: render_types(&param_types),
            }),
        }
    }

    async fn run_root(&self, ctx: &Context, key: NodeKey) -> NodeResult<Value> {
        let session = ctx.session();
        let retries = self.core.config.invalidation_retries;
        let mut attempt = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = session.cancelled() => return Err(Failure::Cancelled),
                outcome = self.core.graph.get(ctx, key.clone()) => outcome,
            };
            match outcome.result {
                Err(Failure::Invalidated) if attempt < retries => {
                    attempt += 1;
                    warn!(node = %key, attempt, "Root invalidated while running, retrying");
                    tokio::time::sleep(self.core.config.invalidation_delay()).await;
                }
                result => return result,
            }
        }
    }

    pub fn invalidate_paths<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        self.core.graph.invalidate_paths(paths)
    }

    pub fn invalidate_all(&self) -> usize {
        self.core.graph.invalidate_all()
    }

    /// Shrink the graph to `max_graph_entries`, keeping what live sessions need.
    pub fn garbage_collect(&self) -> usize {
        let roots = self.core.sessions.live_roots();
        self.core
            .graph
            .garbage_collect(&roots, self.core.config.max_graph_entries)
    }

    /// Interrupt every session of this scheduler.
    pub fn cancel_all_sessions(&self) {
        info!(sessions = self.core.sessions.len(), "Cancelling all sessions");
        self.core.sessions.cancel_all();
    }

    /// Render the nodes reachable from the session's last roots, in DOT.
    pub fn visualize_graph(&self, session: &Session, w: &mut dyn io::Write) -> io::Result<()> {
        self.core.graph.visualize(&session.roots(), w)
    }

    pub fn visualize_rule_graph(&self, w: &mut dyn io::Write) -> io::Result<()> {
        self.core.rule_graph.visualize(w)
    }

    pub fn graph_len(&self) -> usize {
        self.core.graph.len()
    }
}

fn render_types(types: &BTreeSet<TypeId>) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
