//! Readiness signals collected during the prepare phase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a blocking concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcernKind {
    /// The call itself failed (timeout, transport error, missing collaborator)
    SystemError,
    /// The component is not in a state that accepts updates
    ComponentState,
    /// A required adaptation cannot be applied
    Adaptation,
    /// The change conflicts with the component's contract
    Compatibility,
    /// The run was cancelled before the component was asked
    Cancelled,
}

/// A reason a target is not ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    #[serde(rename = "type")]
    pub kind: ConcernKind,
    pub description: String,
}

impl Concern {
    pub fn new(kind: ConcernKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn system_error(description: impl Into<String>) -> Self {
        Self::new(ConcernKind::SystemError, description)
    }
}

/// A target's answer to "may this change be applied to you?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessSignal {
    pub target_id: String,
    pub ready: bool,
    #[serde(default)]
    pub concerns: Vec<Concern>,
    #[serde(default)]
    pub adaptations_needed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ReadinessSignal {
    pub fn ready(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            ready: true,
            concerns: Vec::new(),
            adaptations_needed: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// A not-ready signal carrying a single concern
    pub fn not_ready(target_id: impl Into<String>, concern: Concern) -> Self {
        Self {
            target_id: target_id.into(),
            ready: false,
            concerns: vec![concern],
            adaptations_needed: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}
