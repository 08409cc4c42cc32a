//! Prepare phase: readiness collection

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::control::RunControl;
use crate::collaborator::CollaboratorRegistry;
use crate::domain::{Concern, PropagationContext, ReadinessSignal};

/// Readiness collection stopped because the run was cancelled
#[derive(Debug, Clone, PartialEq)]
pub struct Interrupted {
    pub reason: &'static str,
    /// Signals collected before the stop
    pub signals: BTreeMap<String, ReadinessSignal>,
}

/// Asks every target, in dependency order, whether it can take the change
#[derive(Clone)]
pub struct ReadinessCollector {
    collaborators: Arc<CollaboratorRegistry>,
    timeout: Duration,
}

impl ReadinessCollector {
    pub fn new(collaborators: Arc<CollaboratorRegistry>, timeout: Duration) -> Self {
        Self { collaborators, timeout }
    }

    /// Query every target; a failing call becomes a not-ready signal
    ///
    /// Targets are queried strictly one after another in `order`. No target
    /// is skipped because an earlier one said no.
    pub async fn collect(
        &self,
        control: &RunControl,
        origin_id: &str,
        order: &[String],
        contexts: &BTreeMap<String, PropagationContext>,
    ) -> Result<BTreeMap<String, ReadinessSignal>, Interrupted> {
        debug!(%origin_id, targets = order.len(), "collect: called");
        let mut signals = BTreeMap::new();

        for target in order {
            if let Some(reason) = control.stop_reason() {
                warn!(%target, reason, "collect: stopping before readiness check");
                return Err(Interrupted { reason, signals });
            }

            let signal = match contexts.get(target) {
                None => ReadinessSignal::not_ready(target, Concern::system_error("no propagation context generated")),
                Some(context) => match self
                    .collaborators
                    .check_readiness(target, origin_id, context, self.timeout)
                    .await
                {
                    Ok(reply) => ReadinessSignal {
                        target_id: target.clone(),
                        ready: reply.ready,
                        concerns: reply.concerns,
                        adaptations_needed: reply.adaptations_needed,
                        timestamp: Utc::now(),
                    },
                    Err(e) => {
                        warn!(%target, error = %e, "collect: readiness check failed");
                        let concern = Concern::system_error(format!("readiness check failed: {}", e));
                        ReadinessSignal::not_ready(target, concern)
                    }
                },
            };
            debug!(%target, ready = signal.ready, concerns = signal.concerns.len(), "collect: signal");
            signals.insert(target.clone(), signal);
        }

        info!(
            targets = signals.len(),
            not_ready = signals.values().filter(|s| !s.ready).count(),
            "readiness collected"
        );
        Ok(signals)
    }
}
