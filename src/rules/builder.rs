//! Static resolution of queries into a [`RuleGraph`].
//!
//! Every query is resolved depth first. A product is satisfied either by a
//! param of its type or by a rule whose selects and declared Gets are all
//! satisfiable in turn. Re-entering the same (rule, available params) pair
//! through static selects only is a cycle; re-entering it through a Get is
//! recursion over new values and is left to the runtime cycle check.
//!
//! Results that depend on what is currently on the resolution stack are
//! provisional and never memoized.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use super::rule::{DependencyKey, ParamTypes, Rule, Types};
use super::rule_graph::{EntryId, Query, RuleEntry, RuleGraph, Source};
use crate::error::{Diagnostic, DiagnosticKind, ValidationError};
use crate::externs::TypeId;

/// No frame of the resolution stack was referenced.
const STABLE: usize = usize::MAX;

#[derive(Clone)]
struct Resolved {
    source: Source,
    used: ParamTypes,
    lowest: usize,
}

#[derive(Clone)]
struct Failed {
    kind: DiagnosticKind,
    reason: String,
    details: Vec<String>,
    lowest: usize,
}

struct Frame {
    rule: usize,
    available: ParamTypes,
    entry: usize,
    via_get: bool,
}

pub(super) struct Builder {
    rules: Vec<Rule>,
    queries: Vec<Query>,
    types: Types,
    by_product: HashMap<TypeId, Vec<usize>>,
    entries: Vec<Option<RuleEntry>>,
    rule_memo: HashMap<(usize, ParamTypes), usize>,
    product_memo: HashMap<(TypeId, ParamTypes), Result<Resolved, Failed>>,
    stack: Vec<Frame>,
}

impl Builder {
    pub(super) fn new(rules: Vec<Rule>, queries: Vec<Query>, types: Types) -> Self {
        let mut by_product: HashMap<TypeId, Vec<usize>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            by_product.entry(rule.product.clone()).or_default().push(idx);
        }
        Builder {
            rules,
            queries,
            types,
            by_product,
            entries: Vec::new(),
            rule_memo: HashMap::new(),
            product_memo: HashMap::new(),
            stack: Vec::new(),
        }
    }

    pub(super) fn build(mut self) -> Result<RuleGraph, ValidationError> {
        let mut roots = HashMap::new();
        let mut diagnostics = Vec::new();

        for query in std::mem::take(&mut self.queries) {
            match self.resolve_product(&query.product, &query.params, false) {
                Ok(resolved) => {
                    roots.insert(query, resolved.source);
                }
                Err(failed) => diagnostics.push(Diagnostic {
                    kind: failed.kind,
                    product: query.product.clone(),
                    params: query.params.iter().cloned().collect(),
                    reason: failed.reason,
                    details: failed.details,
                }),
            }
        }

        if !diagnostics.is_empty() {
            return Err(ValidationError { diagnostics });
        }

        self.compute_used_params();
        let (entries, roots) = self.compact(roots);

        let reached: HashSet<usize> = entries.iter().map(|e| e.rule).collect();
        let unreachable: Vec<_> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(idx, rule)| !reached.contains(idx) && !rule.is_intrinsic())
            .map(|(_, rule)| rule.id.clone())
            .collect();
        for rule in &unreachable {
            warn!(rule = %rule, "Rule is not reachable from any query");
        }
        debug!(
            queries = roots.len(),
            entries = entries.len(),
            "Rule graph built"
        );

        Ok(RuleGraph {
            rules: self.rules,
            entries,
            roots,
            unreachable,
            types: self.types,
        })
    }

    fn resolve_product(
        &mut self,
        product: &TypeId,
        available: &ParamTypes,
        via_get: bool,
    ) -> Result<Resolved, Failed> {
        if available.contains(product) {
            return Ok(Resolved {
                source: Source::Param(product.clone()),
                used: ParamTypes::from([product.clone()]),
                lowest: STABLE,
            });
        }
        let memo_key = (product.clone(), available.clone());
        if let Some(result) = self.product_memo.get(&memo_key) {
            return result.clone();
        }

        let candidates = self.by_product.get(product).cloned().unwrap_or_default();
        let result = if candidates.is_empty() {
            Err(Failed {
                kind: DiagnosticKind::Unsatisfiable,
                reason: format!(
                    "no rule produces {} and it is not among the params ({})",
                    product,
                    join(available)
                ),
                details: Vec::new(),
                lowest: STABLE,
            })
        } else {
            let mut ok = Vec::new();
            let mut failed = Vec::new();
            for idx in candidates {
                match self.resolve_rule(idx, available, via_get) {
                    Ok(resolved) => ok.push((idx, resolved)),
                    Err(f) => failed.push((idx, f)),
                }
            }
            let lowest = ok
                .iter()
                .map(|(_, r)| r.lowest)
                .chain(failed.iter().map(|(_, f)| f.lowest))
                .min()
                .unwrap_or(STABLE);
            if ok.is_empty() {
                Err(self.no_candidate(product, failed, lowest))
            } else {
                self.choose(product, ok, lowest)
            }
        };

        let stable = match &result {
            Ok(r) => r.lowest == STABLE,
            Err(f) => f.lowest == STABLE,
        };
        if stable {
            self.product_memo.insert(memo_key, result.clone());
        }
        result
    }

    fn resolve_rule(
        &mut self,
        idx: usize,
        available: &ParamTypes,
        via_get: bool,
    ) -> Result<Resolved, Failed> {
        if let Some(&entry) = self.rule_memo.get(&(idx, available.clone())) {
            let used = self.entries[entry]
                .as_ref()
                .map(|e| e.used.clone())
                .unwrap_or_default();
            return Ok(Resolved {
                source: Source::Rule(EntryId(entry)),
                used,
                lowest: STABLE,
            });
        }

        if let Some(pos) = self
            .stack
            .iter()
            .position(|f| f.rule == idx && &f.available == available)
        {
            let progress = via_get || self.stack[pos + 1..].iter().any(|f| f.via_get);
            if progress {
                return Ok(Resolved {
                    source: Source::Rule(EntryId(self.stack[pos].entry)),
                    used: ParamTypes::new(),
                    lowest: pos,
                });
            }
            let path: Vec<String> = self.stack[pos..]
                .iter()
                .map(|f| self.rules[f.rule].id.to_string())
                .chain(std::iter::once(self.rules[idx].id.to_string()))
                .collect();
            return Err(Failed {
                kind: DiagnosticKind::Cyclic,
                reason: format!("{} requires itself: {}", self.rules[idx].id, path.join(" -> ")),
                details: Vec::new(),
                lowest: pos,
            });
        }

        let depth = self.stack.len();
        let entry = self.entries.len();
        self.entries.push(None);
        self.stack.push(Frame {
            rule: idx,
            available: available.clone(),
            entry,
            via_get,
        });

        let keys: Vec<DependencyKey> = self.rules[idx].dependency_keys().collect();
        let mut edges = BTreeMap::new();
        let mut used = ParamTypes::new();
        let mut lowest = STABLE;
        let mut failures = Vec::new();
        for key in keys {
            let mut dep_available = available.clone();
            dep_available.extend(key.provided.iter().cloned());
            match self.resolve_product(&key.product, &dep_available, key.provides_params()) {
                Ok(resolved) => {
                    lowest = lowest.min(resolved.lowest);
                    used.extend(
                        resolved
                            .used
                            .into_iter()
                            .filter(|t| !key.provided.contains(t)),
                    );
                    edges.insert(key, resolved.source);
                }
                Err(failed) => {
                    lowest = lowest.min(failed.lowest);
                    failures.push((key, failed));
                }
            }
        }
        self.stack.pop();
        let lowest = if lowest >= depth { STABLE } else { lowest };

        let rule = &self.rules[idx];
        if !failures.is_empty() {
            let kind = combine(failures.iter().map(|(_, f)| f.kind));
            let mut details = Vec::new();
            for (key, failed) in failures {
                details.push(format!("{} of {}: {}", key, rule.id, failed.reason));
                details.extend(failed.details.into_iter().map(|d| format!("  {}", d)));
            }
            return Err(Failed {
                kind,
                reason: format!("{} has unsatisfiable dependencies", rule),
                details,
                lowest,
            });
        }

        self.entries[entry] = Some(RuleEntry {
            rule: idx,
            available: available.clone(),
            used: used.clone(),
            edges,
        });
        if lowest == STABLE {
            self.rule_memo.insert((idx, available.clone()), entry);
        }
        Ok(Resolved {
            source: Source::Rule(EntryId(entry)),
            used,
            lowest,
        })
    }

    fn no_candidate(&self, product: &TypeId, failed: Vec<(usize, Failed)>, lowest: usize) -> Failed {
        let kind = combine(failed.iter().map(|(_, f)| f.kind));
        let mut details = Vec::new();
        for (idx, f) in failed {
            details.push(format!("{}: {}", self.rules[idx].id, f.reason));
            details.extend(f.details.into_iter().map(|d| format!("  {}", d)));
        }
        Failed {
            kind,
            reason: format!("no rule can produce {}", product),
            details,
            lowest,
        }
    }

    /// Highest priority first, then the chain consuming the fewest params.
    fn choose(
        &self,
        product: &TypeId,
        ok: Vec<(usize, Resolved)>,
        lowest: usize,
    ) -> Result<Resolved, Failed> {
        let best_priority = ok
            .iter()
            .map(|(idx, _)| self.rules[*idx].priority)
            .max()
            .unwrap_or_default();
        let mut best: Vec<(usize, Resolved)> = ok
            .into_iter()
            .filter(|(idx, _)| self.rules[*idx].priority == best_priority)
            .collect();
        let fewest = best.iter().map(|(_, r)| r.used.len()).min().unwrap_or_default();
        best.retain(|(_, r)| r.used.len() == fewest);

        if best.len() == 1 {
            let (_, mut resolved) = best.remove(0);
            resolved.lowest = lowest;
            return Ok(resolved);
        }
        Err(Failed {
            kind: DiagnosticKind::Ambiguous,
            reason: format!(
                "{} rules are equally preferred to produce {}",
                best.len(),
                product
            ),
            details: best
                .iter()
                .map(|(idx, r)| format!("{} using ({})", self.rules[*idx], join(&r.used)))
                .collect(),
            lowest,
        })
    }

    /// Fixed point of `used = union(dep.used - dep.provided)` over every entry.
    fn compute_used_params(&mut self) {
        loop {
            let mut changed = false;
            for idx in 0..self.entries.len() {
                let Some(entry) = &self.entries[idx] else {
                    continue;
                };
                let mut used = entry.used.clone();
                for (key, source) in &entry.edges {
                    let dep_used = match source {
                        Source::Param(t) => ParamTypes::from([t.clone()]),
                        Source::Rule(id) => self.entries[id.0]
                            .as_ref()
                            .map(|e| e.used.clone())
                            .unwrap_or_default(),
                    };
                    used.extend(dep_used.into_iter().filter(|t| !key.provided.contains(t)));
                }
                if used.len() != entry.used.len() {
                    if let Some(entry) = self.entries[idx].as_mut() {
                        entry.used = used;
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Keep only entries reachable from the roots and renumber them densely.
    fn compact(
        &mut self,
        roots: HashMap<Query, Source>,
    ) -> (Vec<RuleEntry>, HashMap<Query, Source>) {
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        let mut visit = |id: usize, remap: &mut HashMap<usize, usize>, queue: &mut VecDeque<usize>| {
            if !remap.contains_key(&id) {
                remap.insert(id, order.len());
                order.push(id);
                queue.push_back(id);
            }
        };

        for source in roots.values() {
            if let Source::Rule(id) = source {
                visit(id.0, &mut remap, &mut queue);
            }
        }
        while let Some(id) = queue.pop_front() {
            if let Some(entry) = &self.entries[id] {
                for source in entry.edges.values() {
                    if let Source::Rule(dep) = source {
                        visit(dep.0, &mut remap, &mut queue);
                    }
                }
            }
        }

        let renumber = |source: &Source| match source {
            Source::Rule(id) => Source::Rule(EntryId(remap[&id.0])),
            param => param.clone(),
        };
        let entries = order
            .iter()
            .filter_map(|id| self.entries[*id].as_ref())
            .map(|entry| RuleEntry {
                rule: entry.rule,
                available: entry.available.clone(),
                used: entry.used.clone(),
                edges: entry
                    .edges
                    .iter()
                    .map(|(k, s)| (k.clone(), renumber(s)))
                    .collect(),
            })
            .collect();
        let roots = roots.iter().map(|(q, s)| (q.clone(), renumber(s))).collect();
        (entries, roots)
    }
}

/// Ambiguity dominates; all-cyclic stays cyclic; anything else is unsatisfiable.
fn combine(kinds: impl Iterator<Item = DiagnosticKind>) -> DiagnosticKind {
    let kinds: Vec<DiagnosticKind> = kinds.collect();
    if kinds.contains(&DiagnosticKind::Ambiguous) {
        DiagnosticKind::Ambiguous
    } else if !kinds.is_empty() && kinds.iter().all(|k| *k == DiagnosticKind::Cyclic) {
        DiagnosticKind::Cyclic
    } else {
        DiagnosticKind::Unsatisfiable
    }
}

fn join(types: &ParamTypes) -> String {
    types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}
