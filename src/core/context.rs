use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Core, RunId, Session};
use crate::error::NodeResult;
use crate::externs::{Externs, Value};
use crate::nodes::NodeKey;

/// One frame of the call stack of node requests.
struct Frame {
    key: NodeKey,
    parent: Option<Arc<Frame>>,
}

/// What a running node sees of the engine.
///
/// A root context belongs to the session request itself; each node run gets
/// a child context that records the dependencies it requests.
#[derive(Clone)]
pub struct Context {
    core: Arc<Core>,
    session: Session,
    run_id: RunId,
    frame: Option<Arc<Frame>>,
    deps: Option<Arc<Mutex<Vec<NodeKey>>>>,
    run_scoped: Arc<AtomicBool>,
}

impl Context {
    pub(crate) fn root(session: &Session) -> Self {
        Context {
            core: session.core().clone(),
            run_id: session.run_id(),
            session: session.clone(),
            frame: None,
            deps: None,
            run_scoped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn for_node(&self, key: NodeKey, deps: Arc<Mutex<Vec<NodeKey>>>) -> Self {
        Context {
            core: self.core.clone(),
            session: self.session.clone(),
            run_id: self.run_id,
            frame: Some(Arc::new(Frame {
                key,
                parent: self.frame.clone(),
            })),
            deps: Some(deps),
            run_scoped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn externs(&self) -> &Externs {
        &self.core.externs
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The node this context runs, if any.
    pub fn current(&self) -> Option<&NodeKey> {
        self.frame.as_ref().map(|f| &f.key)
    }

    /// Request the value of `key`, recording it as a dependency of the current node.
    pub async fn get(&self, key: NodeKey) -> NodeResult<Value> {
        let outcome = self.core.graph.get(self, key).await;
        if outcome.scope.is_some() {
            self.mark_run_scoped();
        }
        outcome.result
    }

    pub(crate) fn record_dep(&self, key: NodeKey) {
        if let Some(deps) = &self.deps {
            deps.lock().push(key);
        }
    }

    /// The current node's result will only be valid within this run.
    pub(crate) fn mark_run_scoped(&self) {
        self.run_scoped.store(true, Ordering::Release);
    }

    pub(crate) fn is_run_scoped(&self) -> bool {
        self.run_scoped.load(Ordering::Acquire)
    }

    /// If `key` is already on the call stack, the path from it to the new request.
    pub(crate) fn cycle_path(&self, key: &NodeKey) -> Option<Vec<String>> {
        let mut stack = Vec::new();
        let mut cursor = self.frame.as_deref();
        while let Some(frame) = cursor {
            stack.push(&frame.key);
            if &frame.key == key {
                stack.reverse();
                let mut path: Vec<String> = stack.iter().map(|k| k.to_string()).collect();
                path.push(key.to_string());
                return Some(path);
            }
            cursor = frame.parent.as_deref();
        }
        None
    }
}
