//! Reflection/revision loop
//!
//! Bounded self-critique over an oracle-produced artifact. Each iteration
//! asks for a reflection, stops if the reflection is satisfied, otherwise
//! asks for a revision and adopts it. The loop never performs more than
//! `max_iterations` revision calls and never drops a non-null artifact.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::events::EventEmitter;
use crate::oracle::{Oracle, PromptKind, ask, number_at};
use crate::propagation::RunControl;
use crate::state::{StateManager, StateResponse, keys};

/// Reflection score at or above which an artifact with no critical improvements is accepted
pub const QUALITY_THRESHOLD: f64 = 7.0;

/// Revision confidence at or above which an artifact without significant changes is accepted
pub const CONFIDENCE_THRESHOLD: f64 = 8.0;

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generated,
    Reflecting,
    Revising,
    /// The artifact was accepted
    Converged,
    /// Iterations ran out or a call failed; the last good artifact is kept
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted)
    }
}

/// Outcome of one loop run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionState {
    pub operation_id: String,
    /// Reflection rounds started
    pub iteration: u32,
    pub current_artifact: Value,
    pub converged: bool,
    pub state: LoopState,
    /// Revision calls issued
    pub revisions: u32,
}

/// Audit entry persisted for each iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationAudit {
    pub iteration: u32,
    pub reflection: Option<Value>,
    pub revision: Option<Value>,
    pub quality: Option<f64>,
    pub confidence: Option<f64>,
    pub state: LoopState,
    pub timestamp: DateTime<Utc>,
}

/// What the loop is refining, for keys, events and prompts
#[derive(Debug, Clone, Copy)]
pub struct LoopScope<'a> {
    /// Artifact family, e.g. `analysis`, `context`, `guidance`
    pub phase: &'a str,
    /// Target id, or the origin id for run-wide artifacts
    pub scope: &'a str,
}

#[derive(Clone)]
pub struct ReflectionLoop {
    oracle: Arc<dyn Oracle>,
    state: StateManager,
    max_iterations: u32,
    oracle_timeout: Duration,
}

impl ReflectionLoop {
    pub fn new(oracle: Arc<dyn Oracle>, state: StateManager, max_iterations: u32, oracle_timeout: Duration) -> Self {
        Self {
            oracle,
            state,
            max_iterations,
            oracle_timeout,
        }
    }

    /// Ask the oracle for an artifact and refine it
    ///
    /// Returns `None` when the run is already stopping, the oracle fails or
    /// the first artifact lacks `key`; callers fall back to their
    /// deterministic path.
    pub async fn generate(
        &self,
        emitter: &EventEmitter,
        control: &RunControl,
        kind: PromptKind,
        scope: LoopScope<'_>,
        input_context: &Value,
        key: &str,
    ) -> StateResponse<Option<Value>> {
        debug!(%kind, phase = scope.phase, scope = scope.scope, "generate: called");
        if let Some(reason) = control.stop_reason() {
            debug!(%kind, scope = scope.scope, reason, "generate: run stopping, skipping oracle");
            return Ok(None);
        }
        let artifact = match ask(self.oracle.as_ref(), kind, input_context, self.oracle_timeout).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(%kind, scope = scope.scope, error = %e, "generate: oracle failed, using fallback");
                emitter.warning(&format!("{}:{}", scope.phase, scope.scope), &e.to_string());
                return Ok(None);
            }
        };
        if artifact.get(key).is_none() {
            warn!(%kind, scope = scope.scope, %key, "generate: artifact missing key, using fallback");
            emitter.warning(
                &format!("{}:{}", scope.phase, scope.scope),
                &format!("oracle artifact has no `{}`", key),
            );
            return Ok(None);
        }

        let run = self.refine(emitter, control, scope, input_context, artifact).await?;
        Ok(Some(run.current_artifact))
    }

    /// Refine `initial` against `input_context`
    ///
    /// Only state store failures are returned as errors. Oracle failures and
    /// a stopping run end the loop in `Exhausted` with the last good artifact.
    pub async fn refine(
        &self,
        emitter: &EventEmitter,
        control: &RunControl,
        scope: LoopScope<'_>,
        input_context: &Value,
        initial: Value,
    ) -> StateResponse<RevisionState> {
        let request_id = emitter.request_id();
        let mut run = RevisionState {
            operation_id: format!("{}:{}:{}", request_id, scope.phase, scope.scope),
            iteration: 0,
            current_artifact: initial,
            converged: false,
            state: LoopState::Generated,
            revisions: 0,
        };
        debug!(operation_id = %run.operation_id, max_iterations = self.max_iterations, "refine: called");

        while !run.state.is_terminal() && run.iteration < self.max_iterations {
            if let Some(reason) = control.stop_reason() {
                warn!(operation_id = %run.operation_id, reason, "refine: run stopping before reflection");
                run.state = LoopState::Exhausted;
                break;
            }
            run.iteration += 1;
            let iteration = run.iteration;
            let mut audit = IterationAudit {
                iteration,
                reflection: None,
                revision: None,
                quality: None,
                confidence: None,
                state: LoopState::Reflecting,
                timestamp: Utc::now(),
            };

            run.state = LoopState::Reflecting;
            let reflection_context = prompt_context(input_context, scope, iteration, |ctx| {
                ctx.insert("output_result".to_string(), run.current_artifact.clone());
            });
            let reflection = ask(
                self.oracle.as_ref(),
                PromptKind::Reflection,
                &reflection_context,
                self.oracle_timeout,
            )
            .await;
            let reflection = match reflection {
                Ok(reflection) => reflection,
                Err(e) => {
                    warn!(operation_id = %run.operation_id, iteration, error = %e, "refine: reflection failed");
                    run.state = LoopState::Exhausted;
                    audit.state = run.state;
                    self.record(emitter, scope, &audit).await?;
                    break;
                }
            };

            let quality = number_at(
                &reflection,
                &["reflection_results", "overall_assessment", "decision_quality_score"],
            );
            let improvements = reflection
                .pointer("/reflection_results/critical_improvements")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            audit.quality = quality;
            debug!(iteration, ?quality, improvements, "refine: reflection received");

            if quality.unwrap_or(0.0) >= QUALITY_THRESHOLD && improvements == 0 {
                info!(operation_id = %run.operation_id, iteration, ?quality, "refine: converged on reflection");
                run.state = LoopState::Converged;
                run.converged = true;
                audit.reflection = Some(reflection);
                audit.state = run.state;
                self.record(emitter, scope, &audit).await?;
                break;
            }

            if let Some(reason) = control.stop_reason() {
                warn!(operation_id = %run.operation_id, iteration, reason, "refine: run stopping before revision");
                run.state = LoopState::Exhausted;
                audit.reflection = Some(reflection);
                audit.state = run.state;
                self.record(emitter, scope, &audit).await?;
                break;
            }

            run.state = LoopState::Revising;
            let revision_context = prompt_context(input_context, scope, iteration, |ctx| {
                ctx.insert("output_result".to_string(), run.current_artifact.clone());
                ctx.insert("reflection_result".to_string(), reflection.clone());
            });
            audit.reflection = Some(reflection);
            run.revisions += 1;
            let revision = ask(
                self.oracle.as_ref(),
                PromptKind::Revision,
                &revision_context,
                self.oracle_timeout,
            )
            .await;

            let revision = match revision {
                Ok(revision) => revision,
                Err(e) => {
                    warn!(operation_id = %run.operation_id, iteration, error = %e, "refine: revision failed");
                    run.state = LoopState::Exhausted;
                    audit.state = run.state;
                    self.record(emitter, scope, &audit).await?;
                    break;
                }
            };

            let Some(revised) = revised_artifact(&revision) else {
                warn!(operation_id = %run.operation_id, iteration, "refine: revision carried no artifact");
                run.state = LoopState::Exhausted;
                audit.revision = Some(revision);
                audit.state = run.state;
                self.record(emitter, scope, &audit).await?;
                break;
            };
            run.current_artifact = revised;

            let confidence = number_at(&revision, &["revision_results", "revision_summary", "confidence", "score"]);
            let significant = revision
                .pointer("/revision_results/revision_summary/decision_changes/significant_content_changes")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            audit.confidence = confidence;
            audit.revision = Some(revision);
            info!(operation_id = %run.operation_id, iteration, ?confidence, significant, "refine: revision adopted");

            if confidence.unwrap_or(0.0) >= CONFIDENCE_THRESHOLD && !significant {
                run.state = LoopState::Converged;
                run.converged = true;
            } else if run.iteration >= self.max_iterations {
                run.state = LoopState::Exhausted;
            }
            audit.state = run.state;
            self.record(emitter, scope, &audit).await?;
        }

        if !run.state.is_terminal() {
            run.state = LoopState::Exhausted;
        }
        debug!(operation_id = %run.operation_id, state = ?run.state, revisions = run.revisions, "refine: done");
        Ok(run)
    }

    async fn record(&self, emitter: &EventEmitter, scope: LoopScope<'_>, audit: &IterationAudit) -> StateResponse<()> {
        let key = keys::revision(emitter.request_id(), scope.phase, scope.scope, audit.iteration);
        self.state.put_json(&key, audit).await?;
        emitter.revision_completed(scope.phase, scope.scope, audit.iteration, audit.quality, audit.confidence);
        Ok(())
    }
}

/// Build a reflection or revision context
///
/// Identity fields are lifted to the top level so prompt templates can use them.
fn prompt_context(
    input_context: &Value,
    scope: LoopScope<'_>,
    iteration: u32,
    fill: impl FnOnce(&mut serde_json::Map<String, Value>),
) -> Value {
    let mut ctx = serde_json::Map::new();
    for key in ["origin_id", "target_id"] {
        if let Some(value) = input_context.get(key) {
            ctx.insert(key.to_string(), value.clone());
        }
    }
    ctx.insert("phase".to_string(), json!(scope.phase));
    ctx.insert("iteration".to_string(), json!(iteration));
    ctx.insert("input_context".to_string(), input_context.clone());
    fill(&mut ctx);
    ctx.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    Value::Object(ctx)
}

/// The revised artifact, under `revised_output` or the older `revised_validation`
fn revised_artifact(revision: &Value) -> Option<Value> {
    let results = revision.get("revision_results")?;
    ["revised_output", "revised_validation"]
        .iter()
        .filter_map(|key| results.get(*key))
        .find(|v| !v.is_null())
        .cloned()
}
