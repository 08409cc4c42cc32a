//! Component dependency graph
//!
//! Answers "who depends on this component" and provides the static order
//! used whenever the oracle has no usable ordering hint.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::config::GraphConfig;

mod order;

pub use order::DependencyOrderer;

/// Read access to the dependency graph
pub trait DependencyGraph: Send + Sync {
    /// Components that directly depend on `id`
    ///
    /// An unknown id has no dependents.
    fn direct_dependents(&self, id: &str) -> Vec<String>;

    /// Topological order of every known component, dependencies first
    fn static_order(&self) -> Vec<String>;

    /// Every component reachable from `id` through dependents, in BFS discovery order
    ///
    /// The origin itself is never included, even when a cycle leads back to it.
    fn transitive_dependents(&self, id: &str) -> Vec<String> {
        debug!(%id, "transitive_dependents: called");
        distances(self, id).into_iter().map(|(node, _)| node).collect()
    }

    /// Longest shortest-path distance from `origin` to any of `targets`
    ///
    /// Targets not reachable from the origin count as depth 1.
    fn dependency_depth(&self, origin: &str, targets: &[String]) -> usize {
        let reached: HashMap<String, usize> = distances(self, origin).into_iter().collect();
        targets
            .iter()
            .map(|t| reached.get(t).copied().unwrap_or(1))
            .max()
            .unwrap_or(0)
    }
}

/// BFS from `origin`, returning (node, distance) in discovery order
fn distances<G: DependencyGraph + ?Sized>(graph: &G, origin: &str) -> Vec<(String, usize)> {
    let mut seen: HashSet<String> = HashSet::from([origin.to_string()]);
    let mut queue = VecDeque::from([(origin.to_string(), 0usize)]);
    let mut found = Vec::new();

    while let Some((node, depth)) = queue.pop_front() {
        for dependent in graph.direct_dependents(&node) {
            if seen.insert(dependent.clone()) {
                found.push((dependent.clone(), depth + 1));
                queue.push_back((dependent, depth + 1));
            }
        }
    }
    found
}

/// Dependency graph defined in configuration
#[derive(Debug, Clone)]
pub struct StaticGraph {
    dependents: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
}

impl StaticGraph {
    pub fn new(dependents: BTreeMap<String, Vec<String>>, static_order: Option<Vec<String>>) -> Self {
        debug!(components = dependents.len(), "StaticGraph::new: called");
        let order = match static_order {
            Some(order) => order,
            None => topological_order(&dependents),
        };
        Self { dependents, order }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.dependents.clone(), config.static_order.clone())
    }

    /// Whether the component has an entry in the graph
    pub fn contains(&self, id: &str) -> bool {
        self.dependents.contains_key(id)
    }
}

impl DependencyGraph for StaticGraph {
    fn direct_dependents(&self, id: &str) -> Vec<String> {
        match self.dependents.get(id) {
            Some(dependents) => dependents.clone(),
            None => {
                warn!(%id, "direct_dependents: no dependency entry, treating as leaf");
                Vec::new()
            }
        }
    }

    fn static_order(&self) -> Vec<String> {
        self.order.clone()
    }
}

/// Kahn's algorithm over `component -> dependents` edges
///
/// Ties break alphabetically. Components caught in a cycle are appended in
/// alphabetical order so the result always covers every known component.
fn topological_order(dependents: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (node, outs) in dependents {
        in_degree.entry(node.as_str()).or_insert(0);
        for out in outs {
            *in_degree.entry(out.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        for out in dependents.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(out.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(out.as_str());
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        let placed: HashSet<&str> = order.iter().map(String::as_str).collect();
        let cyclic: Vec<String> = in_degree
            .keys()
            .filter(|n| !placed.contains(*n))
            .map(|n| n.to_string())
            .collect();
        warn!(?cyclic, "topological_order: cycle in dependency graph");
        order.extend(cyclic);
    }
    order
}
