//! Impact scoring
//!
//! The oracle's overall score wins when it supplies one. Otherwise the score
//! is a pure function of four facts about the change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::Change;
use crate::graph::DependencyGraph;
use crate::oracle::{number_at, section};

/// Facts the heuristic score is computed from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactInputs {
    pub affected_count: usize,
    pub touches_interface: bool,
    pub dependency_depth: usize,
    pub touches_core: bool,
}

/// Deterministic impact score
pub fn heuristic_score(inputs: &ImpactInputs) -> f64 {
    let mut score = 1.0;
    score *= 1.0 + inputs.affected_count as f64 / 10.0;
    if inputs.touches_interface {
        score *= 1.5;
    }
    score *= 1.0 + inputs.dependency_depth as f64 / 5.0;
    if inputs.touches_core {
        score *= 2.0;
    }
    score
}

/// Overall score from a propagation analysis artifact, if it carries a usable one
pub fn oracle_score(analysis: &Value) -> Option<f64> {
    number_at(section(analysis, "propagation_analysis"), &["impact_assessment", "overall_score"])
        .filter(|s| s.is_finite())
}

#[derive(Debug, Clone, Default)]
pub struct ImpactScorer {
    core_components: BTreeSet<String>,
}

impl ImpactScorer {
    pub fn new(core_components: impl IntoIterator<Item = String>) -> Self {
        Self {
            core_components: core_components.into_iter().collect(),
        }
    }

    /// Whether the origin or any changed component is foundational
    pub fn touches_core(&self, change: &Change) -> bool {
        self.core_components.contains(&change.origin_id)
            || change
                .changed_elements()
                .iter()
                .any(|e| self.core_components.contains(&e.name))
    }

    pub fn inputs(&self, change: &Change, affected: &[String], graph: &dyn DependencyGraph) -> ImpactInputs {
        ImpactInputs {
            affected_count: affected.len(),
            touches_interface: change.touches_interface(),
            dependency_depth: graph.dependency_depth(&change.origin_id, affected),
            touches_core: self.touches_core(change),
        }
    }

    pub fn score(
        &self,
        change: &Change,
        affected: &[String],
        graph: &dyn DependencyGraph,
        analysis: Option<&Value>,
    ) -> f64 {
        debug!(change_id = %change.change_id, affected = affected.len(), "score: called");
        if let Some(score) = analysis.and_then(oracle_score) {
            info!(score, "score: using oracle impact score");
            return score;
        }

        let inputs = self.inputs(change, affected, graph);
        let score = heuristic_score(&inputs);
        info!(score, ?inputs, "score: heuristic impact score");
        score
    }
}
