//! Shared engine state and the per-request execution context.

pub mod context;
pub mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use crate::externs::Externs;
use crate::graph::Graph;
use crate::rules::RuleGraph;
use crate::store::Store;

pub use context::Context;
pub use session::{RunId, Session, SessionMetrics, Sessions};

/// Everything sessions of one scheduler share.
pub struct Core {
    pub rule_graph: Arc<RuleGraph>,
    pub externs: Externs,
    pub store: Arc<dyn Store>,
    pub graph: Arc<Graph>,
    pub config: EngineConfig,
    pub(crate) process_permits: Arc<Semaphore>,
    pub sessions: Sessions,
    next_run_id: AtomicU64,
}

impl Core {
    pub fn new(
        rule_graph: RuleGraph,
        externs: Externs,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Self {
        Core {
            rule_graph: Arc::new(rule_graph),
            externs,
            store,
            graph: Arc::new(Graph::new()),
            process_permits: Arc::new(Semaphore::new(config.effective_process_concurrency())),
            config,
            sessions: Sessions::default(),
            next_run_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_run_id(&self) -> RunId {
        RunId(self.next_run_id.fetch_add(1, Ordering::Relaxed))
    }
}
