use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};

use super::rule::{DependencyKey, ParamTypes, Rule, RuleId, Types};
use crate::externs::TypeId;

/// Index of a resolved rule entry inside a [`RuleGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) usize);

/// Where a dependency's value comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// Directly from the param of this type.
    Param(TypeId),
    /// By running the rule entry.
    Rule(EntryId),
}

/// A root the scheduler may be asked to compute.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Query {
    pub product: TypeId,
    pub params: ParamTypes,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|t| t.name()).collect();
        write!(f, "Query({} | {})", self.product, params.join(", "))
    }
}

/// A rule specialised for a set of available params.
#[derive(Clone, Debug)]
pub struct RuleEntry {
    pub(crate) rule: usize,
    pub available: ParamTypes,
    /// The param types the rule and its transitive dependencies actually consume.
    pub used: ParamTypes,
    pub edges: BTreeMap<DependencyKey, Source>,
}

/// The validated result of [`RuleRegistry::finalize`](super::RuleRegistry::finalize).
#[derive(Debug)]
pub struct RuleGraph {
    pub(crate) rules: Vec<Rule>,
    pub(crate) entries: Vec<RuleEntry>,
    pub(crate) roots: HashMap<Query, Source>,
    pub(crate) unreachable: Vec<RuleId>,
    pub(crate) types: Types,
}

impl RuleGraph {
    pub fn root(&self, product: &TypeId, params: &ParamTypes) -> Option<&Source> {
        self.roots.get(&Query {
            product: product.clone(),
            params: params.clone(),
        })
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.roots.keys()
    }

    pub fn entry(&self, id: EntryId) -> &RuleEntry {
        &self.entries[id.0]
    }

    pub fn rule(&self, id: EntryId) -> &Rule {
        &self.rules[self.entries[id.0].rule]
    }

    pub fn edge(&self, id: EntryId, key: &DependencyKey) -> Option<&Source> {
        self.entries[id.0].edges.get(key)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Registered rules that no query can reach. Intrinsics are not reported.
    pub fn unreachable_rules(&self) -> &[RuleId] {
        &self.unreachable
    }

    pub fn types(&self) -> &Types {
        &self.types
    }

    /// Render which rule entries satisfy which products, in DOT.
    pub fn visualize(&self, w: &mut dyn io::Write) -> io::Result<()> {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let mut entry_nodes: HashMap<usize, NodeIndex> = HashMap::new();
        let mut param_nodes: HashMap<TypeId, NodeIndex> = HashMap::new();

        for (idx, entry) in self.entries.iter().enumerate() {
            let available: Vec<&str> = entry.used.iter().map(|t| t.name()).collect();
            let label = format!(
                "{} for {}",
                self.rules[entry.rule],
                if available.is_empty() {
                    "()".to_string()
                } else {
                    available.join(", ")
                }
            );
            entry_nodes.insert(idx, graph.add_node(label));
        }

        let mut add_edge = |graph: &mut DiGraph<String, String>,
                            from: NodeIndex,
                            source: &Source,
                            label: String| {
            let to = match source {
                Source::Rule(id) => entry_nodes[&id.0],
                Source::Param(t) => *param_nodes
                    .entry(t.clone())
                    .or_insert_with(|| graph.add_node(format!("Param({})", t))),
            };
            graph.add_edge(from, to, label);
        };

        let mut queries: Vec<(&Query, &Source)> = self.roots.iter().collect();
        queries.sort_by_key(|(q, _)| q.to_string());
        for (query, source) in queries {
            let from = graph.add_node(query.to_string());
            add_edge(&mut graph, from, source, String::new());
        }
        for (idx, entry) in self.entries.iter().enumerate() {
            let from = entry_nodes[&idx];
            for (key, source) in &entry.edges {
                add_edge(&mut graph, from, source, key.to_string());
            }
        }

        writeln!(w, "{}", Dot::new(&graph))
    }
}
