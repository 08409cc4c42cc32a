//! Per-target propagation context
//!
//! A [`PropagationContext`] is generated once per (run, target) before the
//! target is asked for readiness, and is never modified afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::change::ChangedElement;

/// Impact severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Medium and high impacts require the target to adapt
    pub fn requires_adaptation(&self) -> bool {
        *self >= Severity::Medium
    }
}

/// A tagged impact on the target's interface or behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    pub severity: Severity,
    pub description: String,
}

/// Kind of adaptation a target has to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationKind {
    InterfaceAdaptation,
    BehavioralAdaptation,
    DependencyAdaptation,
}

impl std::fmt::Display for AdaptationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InterfaceAdaptation => write!(f, "interface_adaptation"),
            Self::BehavioralAdaptation => write!(f, "behavioral_adaptation"),
            Self::DependencyAdaptation => write!(f, "dependency_adaptation"),
        }
    }
}

/// An adaptation the target must apply to stay consistent with the change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adaptation {
    #[serde(rename = "type")]
    pub kind: AdaptationKind,
    pub description: String,
}

/// Explanatory context for one target of a propagation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationContext {
    pub target_id: String,
    pub origin_id: String,
    pub change_id: String,
    pub specific_changes: Vec<ChangedElement>,
    pub interface_impacts: Vec<Impact>,
    pub behavioral_impacts: Vec<Impact>,
    pub required_adaptations: Vec<Adaptation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation_guidance: Option<Value>,
}

impl PropagationContext {
    /// Adaptation kinds this context asks for, deduplicated and sorted
    pub fn adaptation_kinds(&self) -> Vec<AdaptationKind> {
        let mut kinds: Vec<AdaptationKind> = self.required_adaptations.iter().map(|a| a.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}
