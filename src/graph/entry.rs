use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};

use crate::core::RunId;
use crate::error::{Failure, NodeResult};
use crate::externs::Value;
use crate::nodes::NodeKey;

/// What every awaiter of a node run receives.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub result: NodeResult<Value>,
    /// Set when the result is only valid within one run.
    pub scope: Option<RunId>,
}

impl Outcome {
    pub fn failed(failure: Failure) -> Self {
        Outcome {
            result: Err(failure),
            scope: None,
        }
    }
}

pub(crate) type RunFuture = Shared<BoxFuture<'static, Outcome>>;

pub(crate) enum EntryState {
    NotStarted,
    Running {
        run_token: u64,
        pending: Option<WeakShared<BoxFuture<'static, Outcome>>>,
        deps: Arc<Mutex<Vec<NodeKey>>>,
    },
    Completed {
        result: NodeResult<Value>,
        deps: Vec<NodeKey>,
        scope: Option<RunId>,
    },
}

/// The memoized state of one [`NodeKey`].
pub struct Entry {
    key: NodeKey,
    pub(crate) state: Mutex<EntryState>,
    evicted: AtomicBool,
    last_used: AtomicU64,
}

impl Entry {
    pub(crate) fn new(key: NodeKey) -> Self {
        Entry {
            key,
            state: Mutex::new(EntryState::NotStarted),
            evicted: AtomicBool::new(false),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        matches!(
            &*self.state.lock(),
            EntryState::Running { pending: Some(weak), .. } if weak.upgrade().is_some()
        )
    }

    /// Dependencies requested by the current run, or by the completed one.
    pub fn deps(&self) -> Vec<NodeKey> {
        match &*self.state.lock() {
            EntryState::NotStarted => Vec::new(),
            EntryState::Running { deps, .. } => deps.lock().clone(),
            EntryState::Completed { deps, .. } => deps.clone(),
        }
    }

    pub fn completed_value(&self) -> Option<Value> {
        match &*self.state.lock() {
            EntryState::Completed {
                result: Ok(value), ..
            } => Some(value.clone()),
            _ => None,
        }
    }

    /// A result scoped to another run must not be observed by `run`.
    pub(crate) fn is_stale_for(&self, run: RunId) -> bool {
        matches!(
            &*self.state.lock(),
            EntryState::Completed { scope: Some(scope), .. } if *scope != run
        )
    }

    pub(crate) fn describe_state(&self) -> &'static str {
        match &*self.state.lock() {
            EntryState::NotStarted => "not started",
            EntryState::Running { .. } => "running",
            EntryState::Completed { result: Ok(_), .. } => "completed",
            EntryState::Completed { result: Err(_), .. } => "failed",
        }
    }
}

/// Aborts the spawned node run once nobody awaits it anymore.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
