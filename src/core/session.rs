use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

use super::Core;
use crate::nodes::NodeKey;

/// Identifies one run of a session. Uncacheable results are reused only within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Counters for the work a session caused.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    rule_invocations: AtomicU64,
    cache_hits: AtomicU64,
    nodes_started: AtomicU64,
}

impl SessionMetrics {
    pub(crate) fn record_rule_invocation(&self) {
        self.rule_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_node_started(&self) {
        self.nodes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rule_invocations(&self) -> u64 {
        self.rule_invocations.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn nodes_started(&self) -> u64 {
        self.nodes_started.load(Ordering::Relaxed)
    }
}

struct SessionInner {
    name: String,
    core: Arc<Core>,
    run_id: Mutex<RunId>,
    cancel: CancellationToken,
    roots: Mutex<Vec<NodeKey>>,
    metrics: SessionMetrics,
}

/// One logical invocation of the engine. Sessions share the scheduler's graph.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(core: &Arc<Core>, name: impl Into<String>) -> Self {
        let session = Session {
            inner: Arc::new(SessionInner {
                name: name.into(),
                core: core.clone(),
                run_id: Mutex::new(core.next_run_id()),
                cancel: CancellationToken::new(),
                roots: Mutex::new(Vec::new()),
                metrics: SessionMetrics::default(),
            }),
        };
        core.sessions.register(&session);
        session
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.inner.core
    }

    pub fn run_id(&self) -> RunId {
        *self.inner.run_id.lock()
    }

    /// Start a new run: uncacheable rules execute again on the next request.
    pub fn new_run_id(&self) -> RunId {
        let run_id = self.inner.core.next_run_id();
        *self.inner.run_id.lock() = run_id;
        run_id
    }

    /// Abort the session's in-flight work. Completed nodes stay valid.
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!(session = %self.inner.name, "Cancelling session");
        }
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// A session on the same scheduler with its own run and cancellation.
    pub fn isolated_clone(&self, name: impl Into<String>) -> Session {
        Session::new(&self.inner.core, name)
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.inner.metrics
    }

    /// The root nodes of the last request executed in this session.
    pub fn roots(&self) -> Vec<NodeKey> {
        self.inner.roots.lock().clone()
    }

    pub(crate) fn set_roots(&self, roots: Vec<NodeKey>) {
        *self.inner.roots.lock() = roots;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("run_id", &self.run_id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registry of the live sessions of a scheduler.
#[derive(Default)]
pub struct Sessions {
    sessions: Mutex<Vec<Weak<SessionInner>>>,
}

impl Sessions {
    fn register(&self, session: &Session) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&session.inner));
    }

    fn live(&self) -> Vec<Arc<SessionInner>> {
        self.sessions.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn cancel_all(&self) {
        for session in self.live() {
            session.cancel.cancel();
        }
    }

    /// Roots of every session that is still alive and not cancelled.
    pub fn live_roots(&self) -> Vec<NodeKey> {
        self.live()
            .iter()
            .filter(|s| !s.cancel.is_cancelled())
            .flat_map(|s| s.roots.lock().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
