//! Commit phase: apply and verify in dependency order

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::control::RunControl;
use crate::collaborator::CollaboratorRegistry;
use crate::domain::{ApplyOutcome, Change, FailureStage, PropagationContext, TargetFailure};

/// Reason recorded for every failed verification
pub const VERIFY_FAILED: &str = "update verification failed";

/// Reason recorded for targets the commit phase never reached
pub const CANCELLED_BEFORE_ATTEMPT: &str = "run cancelled before attempt";

/// What the commit phase produced
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub outcomes: BTreeMap<String, ApplyOutcome>,
    pub failures: Vec<TargetFailure>,
    pub cancelled: bool,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Applies a change target by target, continuing past failures
#[derive(Clone)]
pub struct PropagationExecutor {
    collaborators: Arc<CollaboratorRegistry>,
    timeout: Duration,
}

impl PropagationExecutor {
    pub fn new(collaborators: Arc<CollaboratorRegistry>, timeout: Duration) -> Self {
        Self { collaborators, timeout }
    }

    /// Apply then verify at every target
    ///
    /// A target counts as successful only if both calls succeed. Once an
    /// apply has succeeded its verify always runs, even if the run is
    /// cancelled in between.
    pub async fn apply_all(
        &self,
        control: &RunControl,
        order: &[String],
        contexts: &BTreeMap<String, PropagationContext>,
        change: &Change,
    ) -> ExecutionOutcome {
        debug!(change_id = %change.change_id, targets = order.len(), "apply_all: called");
        let mut result = ExecutionOutcome::default();

        for (index, target) in order.iter().enumerate() {
            if let Some(reason) = control.stop_reason() {
                warn!(%target, reason, remaining = order.len() - index, "apply_all: stopping");
                result.cancelled = true;
                for skipped in &order[index..] {
                    result
                        .failures
                        .push(TargetFailure::new(skipped, FailureStage::Cancelled, CANCELLED_BEFORE_ATTEMPT));
                }
                break;
            }

            match self.apply_one(target, contexts.get(target), change).await {
                Ok(outcome) => {
                    result.outcomes.insert(target.clone(), outcome);
                }
                Err(failure) => {
                    warn!(%target, stage = ?failure.stage, reason = %failure.reason, "apply_all: target failed");
                    result.failures.push(failure);
                }
            }
        }

        info!(
            succeeded = result.outcomes.len(),
            failed = result.failures.len(),
            cancelled = result.cancelled,
            "commit phase finished"
        );
        result
    }

    async fn apply_one(
        &self,
        target: &str,
        context: Option<&PropagationContext>,
        change: &Change,
    ) -> Result<ApplyOutcome, TargetFailure> {
        debug!(%target, "apply_one: called");
        let Some(context) = context else {
            return Err(TargetFailure::new(target, FailureStage::Apply, "no propagation context generated"));
        };

        let reply = self
            .collaborators
            .apply_update(target, &change.origin_id, context, change, self.timeout)
            .await
            .map_err(|e| TargetFailure::new(target, FailureStage::Apply, e.to_string()))?;
        if !reply.success {
            let reason = reply.reason.unwrap_or_else(|| "update rejected by component".to_string());
            return Err(TargetFailure::new(target, FailureStage::Apply, reason));
        }
        let applied_at = Utc::now();

        let verify = self
            .collaborators
            .verify_update(target, &change.change_id, self.timeout)
            .await
            .map_err(|e| {
                TargetFailure::new(target, FailureStage::Verify, VERIFY_FAILED).with_errors(vec![e.to_string()])
            })?;
        if !verify.verified {
            return Err(TargetFailure::new(target, FailureStage::Verify, VERIFY_FAILED).with_errors(verify.errors));
        }

        Ok(ApplyOutcome {
            update_id: change.change_id.clone(),
            applied_at,
            verified_at: Utc::now(),
            details: reply.details,
        })
    }
}
