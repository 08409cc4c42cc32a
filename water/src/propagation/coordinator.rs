//! Propagation coordinator
//!
//! Runs one change through discovery, scoring, context generation, the
//! readiness gate and the commit phase, and owns the durable record.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::context::ContextGenerator;
use super::control::{CancelHandle, RunControl};
use super::executor::PropagationExecutor;
use super::readiness::ReadinessCollector;
use crate::collaborator::CollaboratorRegistry;
use crate::config::{Config, CoordinatorConfig};
use crate::domain::{
    Change, FailureStage, PropagationContext, PropagationRecord, PropagationRequest, RunPhase, TargetFailure,
    generate_id,
};
use crate::events::{EventBus, EventEmitter};
use crate::graph::{DependencyGraph, DependencyOrderer};
use crate::impact::ImpactScorer;
use crate::oracle::{Oracle, PromptKind, section};
use crate::reflection::{LoopScope, ReflectionLoop};
use crate::state::{StateError, StateManager, StateResponse, keys};

/// Reflection phase name for the run-wide analysis artifact
pub const PHASE_ANALYSIS: &str = "analysis";

/// Errors that abort a run
///
/// Everything else is folded into the record.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("State store error: {0}")]
    State(#[from] StateError),
}

/// Orchestrates propagation runs
///
/// Holds its collaborators by handle; nothing it calls holds a reference back.
pub struct Coordinator {
    config: CoordinatorConfig,
    graph: Arc<dyn DependencyGraph>,
    orderer: DependencyOrderer,
    scorer: ImpactScorer,
    reflection: ReflectionLoop,
    contexts: ContextGenerator,
    readiness: ReadinessCollector,
    executor: PropagationExecutor,
    state: StateManager,
    events: Arc<EventBus>,
    roles: BTreeMap<String, String>,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        graph: Arc<dyn DependencyGraph>,
        oracle: Arc<dyn Oracle>,
        state: StateManager,
        events: Arc<EventBus>,
        collaborators: CollaboratorRegistry,
    ) -> Self {
        debug!(collaborators = collaborators.len(), "Coordinator::new: called");
        let settings = config.coordinator.clone();
        let collaborators = Arc::new(collaborators);
        let reflection = ReflectionLoop::new(
            oracle,
            state.clone(),
            settings.max_iterations,
            settings.oracle_timeout(),
        );
        let roles = config.graph.roles.clone();

        Self {
            orderer: DependencyOrderer::from_graph(graph.as_ref()),
            scorer: ImpactScorer::new(config.graph.core_components.iter().cloned()),
            contexts: ContextGenerator::new(reflection.clone(), state.clone(), roles.clone()),
            readiness: ReadinessCollector::new(collaborators.clone(), settings.collaborator_timeout()),
            executor: PropagationExecutor::new(collaborators, settings.collaborator_timeout()),
            reflection,
            graph,
            state,
            events,
            roles,
            config: settings,
        }
    }

    /// Control for a new run, honoring the configured deadline
    pub fn run_control(&self) -> (RunControl, CancelHandle) {
        RunControl::new(self.config.run_deadline())
    }

    /// Propagate a change to every affected component
    pub async fn coordinate(&self, change: &Change) -> Result<PropagationRecord, CoordinationError> {
        let (control, _handle) = self.run_control();
        self.coordinate_with(change, &control).await
    }

    /// Propagate a change under an external cancellation control
    pub async fn coordinate_with(
        &self,
        change: &Change,
        control: &RunControl,
    ) -> Result<PropagationRecord, CoordinationError> {
        let request_id = generate_id("prop");
        let emitter = self.events.emitter_for(&request_id);
        let mut request = PropagationRequest::new(&request_id, &change.origin_id, &change.change_id);
        info!(%request_id, origin_id = %change.origin_id, change_id = %change.change_id, "propagation requested");
        emitter.requested(&change.origin_id, &change.change_id);
        self.save_request(&request).await?;

        // Discover
        let candidates = self.graph.transitive_dependents(&change.origin_id);
        let analysis = if candidates.is_empty() {
            None
        } else {
            self.analyze(&emitter, control, change, &candidates).await?
        };
        let affected = filter_relevant(&candidates, analysis.as_ref());
        request.affected = affected.clone();
        request.advance(RunPhase::Discovered);
        self.save_request(&request).await?;
        emitter.phase(RunPhase::Discovered, affected.len());
        info!(%request_id, candidates = candidates.len(), affected = affected.len(), "discovery complete");

        if affected.is_empty() {
            request.advance(RunPhase::Committed);
            let record = PropagationRecord::no_targets(&request);
            return self.finish(&emitter, &request, record).await;
        }
        if let Some(reason) = control.stop_reason() {
            let record = PropagationRecord::cancelled(&request, BTreeMap::new(), Vec::new());
            return self.cancel(&emitter, &mut request, reason, record).await;
        }

        // Score
        let impact_score = self
            .scorer
            .score(change, &affected, self.graph.as_ref(), analysis.as_ref());
        request.impact_score = Some(impact_score);

        // Context fan-out
        let contexts = self.generate_contexts(&emitter, control, change, &affected).await?;
        if let Some(reason) = control.stop_reason() {
            let record = PropagationRecord::cancelled(&request, BTreeMap::new(), Vec::new());
            return self.cancel(&emitter, &mut request, reason, record).await;
        }

        // Prepare
        let hint = analysis.as_ref().and_then(oracle_order);
        let order = self.orderer.order(&affected, hint.as_deref());
        debug!(%request_id, ?order, "propagation order");
        let signals = match self.readiness.collect(control, &change.origin_id, &order, &contexts).await {
            Ok(signals) => signals,
            Err(interrupted) => {
                self.state
                    .put_json(&keys::readiness(&request_id), &interrupted.signals)
                    .await?;
                let record = PropagationRecord::cancelled(&request, BTreeMap::new(), Vec::new());
                return self.cancel(&emitter, &mut request, interrupted.reason, record).await;
            }
        };
        self.state.put_json(&keys::readiness(&request_id), &signals).await?;
        request.advance(RunPhase::Prepared);
        self.save_request(&request).await?;
        emitter.phase(RunPhase::Prepared, affected.len());

        let rejections: Vec<TargetFailure> = order
            .iter()
            .filter_map(|target| signals.get(target).filter(|s| !s.ready))
            .map(|signal| {
                TargetFailure::new(&signal.target_id, FailureStage::Readiness, "target not ready")
                    .with_concerns(signal.concerns.clone())
            })
            .collect();
        if !rejections.is_empty() {
            warn!(%request_id, rejections = rejections.len(), "readiness gate closed, nothing applied");
            request.advance(RunPhase::Rejected);
            let record = PropagationRecord::rejected(&request, rejections);
            return self.finish(&emitter, &request, record).await;
        }

        // Commit
        let execution = self.executor.apply_all(control, &order, &contexts, change).await;
        if execution.cancelled {
            let reason = control.stop_reason().unwrap_or("run cancelled");
            let record = PropagationRecord::cancelled(&request, execution.outcomes, execution.failures);
            return self.cancel(&emitter, &mut request, reason, record).await;
        }
        request.advance(RunPhase::Committed);
        let record = PropagationRecord::committed(&request, execution.outcomes, execution.failures);
        self.finish(&emitter, &request, record).await
    }

    /// Load the persisted result of a run
    pub async fn load_record(&self, request_id: &str) -> StateResponse<Option<PropagationRecord>> {
        self.state.get_json(&keys::result(request_id)).await
    }

    async fn analyze(
        &self,
        emitter: &EventEmitter,
        control: &RunControl,
        change: &Change,
        candidates: &[String],
    ) -> StateResponse<Option<Value>> {
        debug!(origin_id = %change.origin_id, candidates = candidates.len(), "analyze: called");
        let structure: BTreeMap<&str, Vec<String>> = std::iter::once(change.origin_id.as_str())
            .chain(candidates.iter().map(String::as_str))
            .map(|id| (id, self.graph.direct_dependents(id)))
            .collect();
        let input = json!({
            "origin_id": change.origin_id,
            "change_id": change.change_id,
            "update": change.payload,
            "validation_result": change.validation_result,
            "candidates": candidates,
            "dependency_structure": structure,
            "roles": self.roles,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let scope = LoopScope {
            phase: PHASE_ANALYSIS,
            scope: &change.origin_id,
        };
        self.reflection
            .generate(emitter, control, PromptKind::PropagationAnalysis, scope, &input, "propagation_analysis")
            .await
    }

    async fn generate_contexts(
        &self,
        emitter: &EventEmitter,
        control: &RunControl,
        change: &Change,
        affected: &[String],
    ) -> StateResponse<BTreeMap<String, PropagationContext>> {
        let limit = self.config.context_concurrency.max(1);
        debug!(targets = affected.len(), limit, "generate_contexts: called");
        // Collected first; a borrowing closure inside the stream makes the run future non-Send
        let pending: Vec<_> = affected
            .iter()
            .map(|target| self.contexts.generate(emitter, control, target, change))
            .collect();
        let generated: Vec<PropagationContext> = stream::iter(pending).buffer_unordered(limit).try_collect().await?;
        Ok(generated.into_iter().map(|ctx| (ctx.target_id.clone(), ctx)).collect())
    }

    async fn save_request(&self, request: &PropagationRequest) -> StateResponse<()> {
        self.state.put_json(&keys::request(&request.request_id), request).await
    }

    async fn cancel(
        &self,
        emitter: &EventEmitter,
        request: &mut PropagationRequest,
        reason: &str,
        record: PropagationRecord,
    ) -> Result<PropagationRecord, CoordinationError> {
        warn!(request_id = %request.request_id, %reason, "propagation cancelled");
        request.advance(RunPhase::Cancelled);
        self.persist(request, &record).await?;
        emitter.cancelled(reason);
        Ok(record)
    }

    /// Persist the record, then announce it
    async fn finish(
        &self,
        emitter: &EventEmitter,
        request: &PropagationRequest,
        record: PropagationRecord,
    ) -> Result<PropagationRecord, CoordinationError> {
        self.persist(request, &record).await?;
        emitter.finished(&record);
        info!(
            request_id = %record.request_id,
            status = %record.status,
            affected = record.metrics.affected_count,
            succeeded = record.metrics.success_count,
            failed = record.metrics.failure_count,
            "propagation finished"
        );
        Ok(record)
    }

    async fn persist(&self, request: &PropagationRequest, record: &PropagationRecord) -> StateResponse<()> {
        if let Err(e) = self.state.put_json(&keys::result(&record.request_id), record).await {
            error!(request_id = %record.request_id, error = %e, "failed to persist propagation record");
            return Err(e);
        }
        self.save_request(request).await
    }
}

/// Keep the candidates the analysis names, in discovery order
///
/// Falls back to every candidate when the analysis is missing or names none of them.
fn filter_relevant(candidates: &[String], analysis: Option<&Value>) -> Vec<String> {
    let named: HashSet<&str> = analysis
        .and_then(|a| section(a, "propagation_analysis").get("affected_agents"))
        .and_then(Value::as_array)
        .map(|agents| {
            agents
                .iter()
                .filter_map(|agent| agent.get("agent_id").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let relevant: Vec<String> = candidates
        .iter()
        .filter(|c| named.contains(c.as_str()))
        .cloned()
        .collect();
    if relevant.is_empty() {
        candidates.to_vec()
    } else {
        relevant
    }
}

/// Ordering hint from the analysis, if it has a non-empty one
fn oracle_order(analysis: &Value) -> Option<Vec<String>> {
    let order: Vec<String> = section(analysis, "propagation_analysis")
        .get("propagation_order")?
        .as_array()?
        .iter()
        .filter_map(|id| id.as_str().map(str::to_string))
        .collect();
    (!order.is_empty()).then_some(order)
}
