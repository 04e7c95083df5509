//! The runtime node graph.
//!
//! The [`Graph`] memoizes one [`Entry`] per [`NodeKey`]. Edges are discovered
//! while nodes run: every request a running node issues is recorded as a
//! dependency, and the reverse edge is what invalidation follows.
//!
//! - At most one run per key is in flight; concurrent requesters share it.
//! - A run is a spawned task that is aborted once every requester is gone.
//! - Invalidation evicts entries and their transitive dependents. A run that
//!   is evicted while in flight finishes as [`Failure::Invalidated`].

mod entry;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use tracing::{debug, info};

use crate::core::{Context, RunId};
use crate::error::{Failure, NodeResult};
use crate::externs::Value;
use crate::nodes::{normalize_build_path, NodeKey};

pub use entry::{Entry, Outcome};
pub(crate) use entry::{AbortOnDrop, EntryState, RunFuture};

/// Counts from one invalidation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvalidationResult {
    /// Entries matching the predicate.
    pub cleared: usize,
    /// Transitive dependents of the cleared entries.
    pub dirtied: usize,
}

impl InvalidationResult {
    pub fn total(&self) -> usize {
        self.cleared + self.dirtied
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    holders: usize,
    until: Option<Instant>,
}

impl LeaseState {
    fn is_active(&self, now: Instant) -> bool {
        self.holders > 0 || self.until.is_some_and(|until| until > now)
    }
}

/// Keeps a node from being garbage collected while held.
pub struct Lease {
    graph: Arc<Graph>,
    key: NodeKey,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let MapEntry::Occupied(mut lease) = self.graph.leases.entry(self.key.clone()) {
            let state = lease.get_mut();
            state.holders = state.holders.saturating_sub(1);
            if !state.is_active(Instant::now()) {
                lease.remove();
            }
        }
    }
}

#[derive(Default)]
pub struct Graph {
    entries: DashMap<NodeKey, Arc<Entry>>,
    dependents: DashMap<NodeKey, HashSet<NodeKey>>,
    leases: DashMap<NodeKey, LeaseState>,
    next_run_token: AtomicU64,
    clock: AtomicU64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &NodeKey) -> Option<Arc<Entry>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// The entry for `key`, created if missing or if its result belongs to another run.
    pub fn get_or_create(&self, key: &NodeKey, run: RunId) -> Arc<Entry> {
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_stale_for(run) {
                    let fresh = Arc::new(Entry::new(key.clone()));
                    let stale = occupied.insert(fresh.clone());
                    stale.evict();
                    fresh
                } else {
                    occupied.get().clone()
                }
            }
            MapEntry::Vacant(vacant) => vacant.insert(Arc::new(Entry::new(key.clone()))).clone(),
        }
    }

    /// Request `key` on behalf of the node running in `ctx`.
    pub(crate) async fn get(&self, ctx: &Context, key: NodeKey) -> Outcome {
        if let Some(path) = ctx.cycle_path(&key) {
            debug!(node = %key, "Cycle on the call stack");
            return Outcome::failed(Failure::Cycle { path });
        }
        let requester = ctx.current().cloned();
        if let Some(requester) = &requester {
            ctx.record_dep(key.clone());
            self.dependents
                .entry(key.clone())
                .or_default()
                .insert(requester.clone());
        }

        let entry = self.get_or_create(&key, ctx.run_id());
        entry.touch(self.clock.fetch_add(1, Ordering::Relaxed));

        let (pending, joined) = {
            let mut state = entry.state.lock();
            let existing = match &*state {
                EntryState::Completed { result, scope, .. } => {
                    ctx.session().metrics().record_cache_hit();
                    return Outcome {
                        result: result.clone(),
                        scope: *scope,
                    };
                }
                EntryState::Running { pending, .. } => pending.as_ref().and_then(|w| w.upgrade()),
                EntryState::NotStarted => None,
            };
            match existing {
                Some(shared) => (shared, true),
                None => (self.start(ctx, &entry, &mut state), false),
            }
        };

        if joined {
            if let Some(requester) = &requester {
                if let Some(path) = self.cycle_through(&key, requester) {
                    debug!(node = %key, "Cycle through in-flight nodes");
                    return Outcome::failed(Failure::Cycle { path });
                }
            }
        }
        pending.await
    }

    fn start(&self, ctx: &Context, entry: &Arc<Entry>, state: &mut EntryState) -> RunFuture {
        let run_token = self.next_run_token.fetch_add(1, Ordering::Relaxed);
        let deps = Arc::new(Mutex::new(Vec::new()));
        let child = ctx.for_node(entry.key().clone(), deps.clone());
        ctx.session().metrics().record_node_started();
        debug!(node = %entry.key(), run_token, "Starting node");

        let graph = ctx.core().graph.clone();
        let running = entry.clone();
        let handle = tokio::spawn(async move {
            let result = running.key().clone().run(child.clone()).await;
            graph.complete(&running, run_token, result, &child)
        });
        let run: RunFuture = AbortOnDrop(handle)
            .map(|joined| joined.unwrap_or_else(|_| Outcome::failed(Failure::Cancelled)))
            .boxed()
            .shared();
        *state = EntryState::Running {
            run_token,
            pending: run.downgrade(),
            deps,
        };
        run
    }

    fn complete(
        &self,
        entry: &Entry,
        run_token: u64,
        result: NodeResult<Value>,
        child: &Context,
    ) -> Outcome {
        let evicted = entry.is_evicted();
        let result = if evicted {
            Err(Failure::Invalidated)
        } else {
            result
        };
        let scope = child.is_run_scoped().then(|| child.run_id());

        let mut state = entry.state.lock();
        let deps = match &*state {
            EntryState::Running {
                run_token: current,
                deps,
                ..
            } if *current == run_token => Some(deps.lock().clone()),
            _ => None,
        };
        if let Some(deps) = deps {
            let memoize = match &result {
                Ok(_) => true,
                Err(failure) => failure.is_memoizable(),
            };
            *state = if memoize && !evicted {
                EntryState::Completed {
                    result: result.clone(),
                    deps,
                    scope,
                }
            } else {
                EntryState::NotStarted
            };
        }
        drop(state);

        match &result {
            Ok(_) => debug!(node = %entry.key(), "Node completed"),
            Err(failure) => debug!(node = %entry.key(), error = %failure, "Node failed"),
        }
        Outcome { result, scope }
    }

    /// A path `key -> ... -> requester -> key` through recorded dependencies, if any.
    fn cycle_through(&self, key: &NodeKey, requester: &NodeKey) -> Option<Vec<String>> {
        let mut came_from: HashMap<NodeKey, NodeKey> = HashMap::new();
        let mut queue = VecDeque::from([key.clone()]);
        let mut seen = HashSet::from([key.clone()]);
        while let Some(current) = queue.pop_front() {
            if &current == requester {
                let mut path = vec![current.to_string()];
                let mut cursor = &current;
                while let Some(prev) = came_from.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                path.push(key.to_string());
                return Some(path);
            }
            let Some(entry) = self.entry(&current) else {
                continue;
            };
            for dep in entry.deps() {
                if seen.insert(dep.clone()) {
                    came_from.insert(dep.clone(), current.clone());
                    queue.push_back(dep);
                }
            }
        }
        None
    }

    /// Evict every entry matching `predicate`, then all of their transitive dependents.
    pub fn invalidate_from_roots(&self, predicate: impl Fn(&NodeKey) -> bool) -> InvalidationResult {
        let roots: Vec<NodeKey> = self
            .entries
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| e.key().clone())
            .collect();
        let cleared = roots.len();
        let evicted = self.evict_cascade(roots, &HashSet::new());
        InvalidationResult {
            cleared,
            dirtied: evicted.saturating_sub(cleared),
        }
    }

    /// Invalidate file nodes for `paths`, or beneath them when a path is a directory.
    /// Paths are relative to the build root.
    pub fn invalidate_paths<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let changed: Vec<PathBuf> = paths
            .iter()
            .map(|path| {
                normalize_build_path(path.as_ref()).unwrap_or_else(|| path.as_ref().to_path_buf())
            })
            .collect();
        let result = self.invalidate_from_roots(|key| {
            key.fs_subject().is_some_and(|subject| {
                changed.iter().any(|changed| subject.starts_with(changed))
            })
        });
        info!(
            cleared = result.cleared,
            dirtied = result.dirtied,
            "Invalidated paths"
        );
        result.total()
    }

    pub fn invalidate_all(&self) -> usize {
        let result = self.invalidate_from_roots(|_| true);
        info!(cleared = result.cleared, "Invalidated all nodes");
        result.total()
    }

    fn evict_cascade(&self, roots: Vec<NodeKey>, protect: &HashSet<NodeKey>) -> usize {
        let mut queue: VecDeque<NodeKey> = roots.into();
        let mut seen = HashSet::new();
        let mut evicted = 0;
        while let Some(key) = queue.pop_front() {
            if protect.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.evict();
                evicted += 1;
                for dep in entry.deps() {
                    if let Some(mut dependents) = self.dependents.get_mut(&dep) {
                        dependents.remove(&key);
                    }
                }
            }
            if let Some((_, dependents)) = self.dependents.remove(&key) {
                queue.extend(dependents);
            }
        }
        evicted
    }

    /// Hold `key` against garbage collection until the returned lease drops.
    pub fn lease(self: &Arc<Self>, key: NodeKey) -> Lease {
        self.leases.entry(key.clone()).or_default().holders += 1;
        Lease {
            graph: self.clone(),
            key,
        }
    }

    /// Hold `key` against garbage collection for `duration`.
    pub fn lease_for(&self, key: NodeKey, duration: Duration) {
        let until = Instant::now() + duration;
        let mut lease = self.leases.entry(key).or_default();
        lease.until = Some(lease.until.map_or(until, |current| current.max(until)));
    }

    fn is_leased(&self, key: &NodeKey, now: Instant) -> bool {
        self.leases.get(key).is_some_and(|lease| lease.is_active(now))
    }

    /// Evict least recently used entries that are not retained until at most
    /// `max_entries` remain. Retained: everything reachable from `live_roots`,
    /// from running nodes, or from leased nodes.
    pub fn garbage_collect(&self, live_roots: &[NodeKey], max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }
        let now = Instant::now();
        self.leases.retain(|_, lease| lease.is_active(now));

        let snapshot: Vec<Arc<Entry>> = self.entries.iter().map(|e| e.value().clone()).collect();
        let mut pending: Vec<NodeKey> = live_roots.to_vec();
        for entry in &snapshot {
            if entry.is_running() || self.is_leased(entry.key(), now) {
                pending.push(entry.key().clone());
            }
        }
        let mut retained = HashSet::new();
        while let Some(key) = pending.pop() {
            if !retained.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.entry(&key) {
                pending.extend(entry.deps());
            }
        }

        let mut candidates: Vec<(u64, NodeKey)> = snapshot
            .iter()
            .filter(|e| !retained.contains(e.key()))
            .map(|e| (e.last_used(), e.key().clone()))
            .collect();
        candidates.sort_by_key(|(last_used, _)| *last_used);

        let mut evicted = 0;
        for (_, key) in candidates {
            if self.entries.len() <= max_entries {
                break;
            }
            evicted += self.evict_cascade(vec![key], &retained);
        }
        info!(evicted, remaining = self.len(), "Garbage collected node graph");
        evicted
    }

    /// Call `f` with every successfully completed node.
    pub fn visit_live(&self, mut f: impl FnMut(&NodeKey, &Value)) {
        let snapshot: Vec<Arc<Entry>> = self.entries.iter().map(|e| e.value().clone()).collect();
        for entry in snapshot {
            if let Some(value) = entry.completed_value() {
                f(entry.key(), &value);
            }
        }
    }

    /// Render the nodes reachable from `roots`, in DOT.
    pub fn visualize(&self, roots: &[NodeKey], w: &mut dyn io::Write) -> io::Result<()> {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let mut indices = HashMap::new();
        let mut queue: VecDeque<NodeKey> = roots.iter().cloned().collect();
        let mut edges = Vec::new();

        while let Some(key) = queue.pop_front() {
            if indices.contains_key(&key) {
                continue;
            }
            let Some(entry) = self.entry(&key) else {
                continue;
            };
            let label = format!("{}\n{}", key, entry.describe_state());
            indices.insert(key.clone(), graph.add_node(label));
            for dep in entry.deps() {
                edges.push((key.clone(), dep.clone()));
                queue.push_back(dep);
            }
        }
        for (from, to) in edges {
            if let (Some(a), Some(b)) = (indices.get(&from), indices.get(&to)) {
                graph.add_edge(*a, *b, String::new());
            }
        }
        writeln!(w, "{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}
