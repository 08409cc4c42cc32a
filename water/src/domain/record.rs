//! Durable propagation records
//!
//! A [`PropagationRecord`] is the single source of truth for a run's result.
//! Every target in the affected set ends up in exactly one of `outcomes`,
//! `failures` or `skipped`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::readiness::Concern;

/// Where a run is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Requested,
    Discovered,
    Prepared,
    Committed,
    Rejected,
    Cancelled,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Discovered => "discovered",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of a run's request, rewritten at each phase boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationRequest {
    pub request_id: String,
    pub origin_id: String,
    pub change_id: String,
    pub phase: RunPhase,
    /// Affected set; fixed once discovery finishes
    #[serde(default)]
    pub affected: Vec<String>,
    #[serde(default)]
    pub impact_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropagationRequest {
    pub fn new(request_id: impl Into<String>, origin_id: impl Into<String>, change_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            origin_id: origin_id.into(),
            change_id: change_id.into(),
            phase: RunPhase::Requested,
            affected: Vec::new(),
            impact_score: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to the next phase
    pub fn advance(&mut self, phase: RunPhase) {
        debug!(request_id = %self.request_id, from = %self.phase, to = %phase, "PropagationRequest::advance: called");
        self.phase = phase;
        self.updated_at = Utc::now();
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every target applied and verified the change (or there were none)
    Succeeded,
    /// The commit phase ran and at least one target failed
    Failed,
    /// At least one target was not ready; nothing was applied
    Rejected,
    /// The run was cancelled or hit its deadline
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A target that applied and verified the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub update_id: String,
    pub applied_at: DateTime<Utc>,
    pub verified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Protocol step at which a target failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Readiness,
    Apply,
    Verify,
    Cancelled,
}

/// A target that did not end up with the change applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: String,
    pub stage: FailureStage,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concerns: Vec<Concern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl TargetFailure {
    pub fn new(target: impl Into<String>, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            stage,
            reason: reason.into(),
            concerns: Vec::new(),
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_concerns(mut self, concerns: Vec<Concern>) -> Self {
        self.concerns = concerns;
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetrics {
    pub affected_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(default)]
    pub rejection_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_phase: Option<String>,
    pub propagation_time_ms: i64,
}

/// The durable result of one coordination run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationRecord {
    pub request_id: String,
    pub origin_id: String,
    pub change_id: String,
    pub status: RunStatus,
    pub success: bool,
    pub affected: Vec<String>,
    pub impact_score: f64,
    pub outcomes: BTreeMap<String, ApplyOutcome>,
    pub failures: Vec<TargetFailure>,
    /// Targets that were neither applied nor failed because no commit took place
    #[serde(default)]
    pub skipped: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metrics: RecordMetrics,
}

/// Rejection records carry this phase marker
pub const REJECTION_PHASE_PRE_VALIDATION: &str = "pre_validation";

impl PropagationRecord {
    fn base(request: &PropagationRequest, status: RunStatus) -> Self {
        let end_time = Utc::now();
        Self {
            request_id: request.request_id.clone(),
            origin_id: request.origin_id.clone(),
            change_id: request.change_id.clone(),
            status,
            success: status == RunStatus::Succeeded,
            affected: request.affected.clone(),
            impact_score: request.impact_score.unwrap_or(0.0),
            outcomes: BTreeMap::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            start_time: request.started_at,
            end_time,
            metrics: RecordMetrics {
                affected_count: request.affected.len(),
                propagation_time_ms: (end_time - request.started_at).num_milliseconds(),
                ..Default::default()
            },
        }
    }

    /// Nothing depends on the origin; the run succeeds trivially
    pub fn no_targets(request: &PropagationRequest) -> Self {
        debug!(request_id = %request.request_id, "PropagationRecord::no_targets: called");
        Self::base(request, RunStatus::Succeeded)
    }

    /// Result of a commit phase that ran to completion
    pub fn committed(
        request: &PropagationRequest,
        outcomes: BTreeMap<String, ApplyOutcome>,
        failures: Vec<TargetFailure>,
    ) -> Self {
        debug!(
            request_id = %request.request_id,
            outcomes = outcomes.len(),
            failures = failures.len(),
            "PropagationRecord::committed: called"
        );
        let status = if failures.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let mut record = Self::base(request, status);
        record.metrics.success_count = outcomes.len();
        record.metrics.failure_count = failures.len();
        record.outcomes = outcomes;
        record.failures = failures;
        record
    }

    /// The prepare phase produced at least one not-ready signal
    ///
    /// `rejections` holds one failure per rejecting target; the remaining
    /// (ready) targets are listed in `skipped`.
    pub fn rejected(request: &PropagationRequest, rejections: Vec<TargetFailure>) -> Self {
        debug!(
            request_id = %request.request_id,
            rejections = rejections.len(),
            "PropagationRecord::rejected: called"
        );
        let mut record = Self::base(request, RunStatus::Rejected);
        record.skipped = request
            .affected
            .iter()
            .filter(|t| !rejections.iter().any(|r| &r.target == *t))
            .cloned()
            .collect();
        record.metrics.rejection_count = rejections.len();
        record.metrics.rejection_phase = Some(REJECTION_PHASE_PRE_VALIDATION.to_string());
        record.failures = rejections;
        record
    }

    /// The run was cancelled
    ///
    /// Targets present in neither `outcomes` nor `failures` are listed in `skipped`.
    pub fn cancelled(
        request: &PropagationRequest,
        outcomes: BTreeMap<String, ApplyOutcome>,
        failures: Vec<TargetFailure>,
    ) -> Self {
        debug!(request_id = %request.request_id, "PropagationRecord::cancelled: called");
        let mut record = Self::base(request, RunStatus::Cancelled);
        record.skipped = request
            .affected
            .iter()
            .filter(|t| !outcomes.contains_key(*t) && !failures.iter().any(|f| &f.target == *t))
            .cloned()
            .collect();
        record.metrics.success_count = outcomes.len();
        record.metrics.failure_count = failures.len();
        record.outcomes = outcomes;
        record.failures = failures;
        record
    }

    /// Look up the failure entry for a target
    pub fn failure_for(&self, target: &str) -> Option<&TargetFailure> {
        self.failures.iter().find(|f| f.target == target)
    }

    /// Every affected target appears exactly once across outcomes, failures and skipped
    pub fn is_partitioned(&self) -> bool {
        let mut seen: Vec<&str> = self
            .outcomes
            .keys()
            .map(String::as_str)
            .chain(self.failures.iter().map(|f| f.target.as_str()))
            .chain(self.skipped.iter().map(String::as_str))
            .collect();
        let mut expected: Vec<&str> = self.affected.iter().map(String::as_str).collect();
        seen.sort_unstable();
        expected.sort_unstable();
        seen == expected
    }
}
