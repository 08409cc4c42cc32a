//! Dependency ordering of a target set

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::DependencyGraph;

/// Orders targets, preferring an oracle-suggested order
///
/// The result is always a permutation of the input: unknown ids in the
/// suggestion are dropped and omitted ids are appended in static order.
#[derive(Debug, Clone, Default)]
pub struct DependencyOrderer {
    rank: HashMap<String, usize>,
}

impl DependencyOrderer {
    pub fn new(static_order: Vec<String>) -> Self {
        let rank = static_order.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        Self { rank }
    }

    pub fn from_graph(graph: &dyn DependencyGraph) -> Self {
        Self::new(graph.static_order())
    }

    fn rank_of(&self, id: &str) -> usize {
        self.rank.get(id).copied().unwrap_or(usize::MAX)
    }

    pub fn order(&self, ids: &[String], oracle_order: Option<&[String]>) -> Vec<String> {
        debug!(ids = ids.len(), has_hint = oracle_order.is_some(), "order: called");
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut placed: HashSet<&str> = HashSet::with_capacity(ids.len());
        let mut ordered = Vec::with_capacity(ids.len());

        for id in oracle_order.unwrap_or_default() {
            if let Some(known) = wanted.get(id.as_str())
                && placed.insert(*known)
            {
                ordered.push(id.clone());
            }
        }

        let mut missing: Vec<&String> = Vec::new();
        for id in ids {
            if placed.insert(id.as_str()) {
                missing.push(id);
            }
        }
        missing.sort_by(|a, b| self.rank_of(a).cmp(&self.rank_of(b)).then_with(|| a.cmp(b)));
        ordered.extend(missing.into_iter().cloned());
        ordered
    }
}
