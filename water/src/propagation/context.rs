//! Per-target context generation
//!
//! The basic context is derived locally and always succeeds. Rich context
//! and adaptation guidance come from the oracle through the reflection loop
//! and are simply left unset when the oracle cannot help.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::domain::{Adaptation, AdaptationKind, Change, Impact, PropagationContext, Severity};
use super::control::RunControl;
use crate::events::EventEmitter;
use crate::oracle::{PromptKind, section};
use crate::reflection::{LoopScope, ReflectionLoop};
use crate::state::{StateManager, StateResponse, keys};

/// Reflection phase names for per-target artifacts
pub const PHASE_CONTEXT: &str = "context";
pub const PHASE_GUIDANCE: &str = "guidance";

/// Derive the oracle-free part of a target's context
pub fn basic_context(target_id: &str, change: &Change) -> PropagationContext {
    let interface = if change.touches_interface() {
        Impact {
            severity: Severity::Medium,
            description: "interface contract changed; consumers may need updating".to_string(),
        }
    } else {
        Impact {
            severity: Severity::Low,
            description: "no interface contract change declared".to_string(),
        }
    };
    let behavioral = if change.has_field("behavior") {
        Impact {
            severity: Severity::Medium,
            description: "behavior changed upstream".to_string(),
        }
    } else {
        Impact {
            severity: Severity::Low,
            description: "minor behavior adjustments may be needed".to_string(),
        }
    };

    let mut required_adaptations = Vec::new();
    if interface.severity.requires_adaptation() {
        required_adaptations.push(Adaptation {
            kind: AdaptationKind::InterfaceAdaptation,
            description: "update interface to accommodate changes".to_string(),
        });
    }
    if behavioral.severity.requires_adaptation() {
        required_adaptations.push(Adaptation {
            kind: AdaptationKind::BehavioralAdaptation,
            description: "adjust behavior to align with upstream changes".to_string(),
        });
    }
    if change.has_field("dependencies") {
        required_adaptations.push(Adaptation {
            kind: AdaptationKind::DependencyAdaptation,
            description: "merge the new dependencies".to_string(),
        });
    }

    PropagationContext {
        target_id: target_id.to_string(),
        origin_id: change.origin_id.clone(),
        change_id: change.change_id.clone(),
        specific_changes: change.changed_elements(),
        interface_impacts: vec![interface],
        behavioral_impacts: vec![behavioral],
        required_adaptations,
        rich_context: None,
        adaptation_guidance: None,
    }
}

/// Builds the context each target receives
#[derive(Clone)]
pub struct ContextGenerator {
    reflection: ReflectionLoop,
    state: StateManager,
    roles: BTreeMap<String, String>,
}

impl ContextGenerator {
    pub fn new(reflection: ReflectionLoop, state: StateManager, roles: BTreeMap<String, String>) -> Self {
        Self {
            reflection,
            state,
            roles,
        }
    }

    /// Generate and persist the context for one target
    ///
    /// Once `control` says stop, the remaining oracle calls are skipped and
    /// the basic context is kept.
    pub async fn generate(
        &self,
        emitter: &EventEmitter,
        control: &RunControl,
        target_id: &str,
        change: &Change,
    ) -> StateResponse<PropagationContext> {
        debug!(%target_id, change_id = %change.change_id, "ContextGenerator::generate: called");
        let mut context = basic_context(target_id, change);
        let guideline = self
            .state
            .get(&keys::guideline(target_id))
            .await?
            .unwrap_or_else(|| json!({}));
        let role = self.roles.get(target_id).map(String::as_str).unwrap_or("unknown role");

        let rich_input = json!({
            "origin_id": change.origin_id,
            "target_id": target_id,
            "change_id": change.change_id,
            "basic_context": context,
            "update": change.payload,
            "validation_result": change.validation_result,
            "target_guideline": guideline,
            "target_role": role,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let scope = LoopScope {
            phase: PHASE_CONTEXT,
            scope: target_id,
        };
        context.rich_context = self
            .reflection
            .generate(emitter, control, PromptKind::ContextGeneration, scope, &rich_input, "rich_context")
            .await?
            .map(|artifact| section(&artifact, "rich_context").clone());

        let guidance_input = json!({
            "origin_id": change.origin_id,
            "target_id": target_id,
            "context": context,
            "target_guideline": guideline,
            "target_role": role,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let scope = LoopScope {
            phase: PHASE_GUIDANCE,
            scope: target_id,
        };
        context.adaptation_guidance = self
            .reflection
            .generate(
                emitter,
                control,
                PromptKind::AdaptationGuidance,
                scope,
                &guidance_input,
                "adaptation_guidance",
            )
            .await?
            .map(|artifact| section(&artifact, "adaptation_guidance").clone());

        self.state
            .put_json(&keys::context(emitter.request_id(), target_id), &context)
            .await?;
        info!(
            %target_id,
            rich = context.rich_context.is_some(),
            guidance = context.adaptation_guidance.is_some(),
            "context generated"
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationResult;
    use crate::events::EventBus;
    use crate::oracle::mock::ScriptedOracle;
    use crate::oracle::{OfflineOracle, Oracle};
    use std::sync::Arc;
    use std::time::Duration;

    fn generator(oracle: Arc<dyn Oracle>, state: &StateManager) -> ContextGenerator {
        let reflection = ReflectionLoop::new(oracle, state.clone(), 3, Duration::from_secs(5));
        let roles = BTreeMap::from([("root_system".to_string(), "roots".to_string())]);
        ContextGenerator::new(reflection, state.clone(), roles)
    }

    fn accepted_reflection(quality: u32) -> Value {
        json!({"reflection_results": {
            "overall_assessment": {"decision_quality_score": quality},
            "critical_improvements": []
        }})
    }

    #[test]
    fn test_basic_context_plain_change() {
        let change = Change::new("garden_planner", json!({"notes": "tweak"}), ValidationResult::approved());
        let ctx = basic_context("root_system", &change);
        assert_eq!(ctx.interface_impacts[0].severity, Severity::Low);
        assert_eq!(ctx.behavioral_impacts[0].severity, Severity::Low);
        assert!(ctx.required_adaptations.is_empty());
        assert_eq!(ctx.change_id, change.change_id);
    }

    #[test]
    fn test_basic_context_adaptations() {
        let change = Change::new(
            "garden_planner",
            json!({
                "interfaces": {"soil": "v2"},
                "behavior": "water twice daily",
                "dependencies": ["sun"],
                "ordered_components": [{"name": "soil"}]
            }),
            ValidationResult::approved(),
        );
        let ctx = basic_context("root_system", &change);
        assert_eq!(
            ctx.adaptation_kinds(),
            vec![
                AdaptationKind::InterfaceAdaptation,
                AdaptationKind::BehavioralAdaptation,
                AdaptationKind::DependencyAdaptation
            ]
        );
        assert_eq!(ctx.specific_changes.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_degrades_to_basic() {
        let state = StateManager::spawn_memory();
        let bus = EventBus::with_default_capacity();
        let emitter = bus.emitter_for("req-1");
        let change = Change::new("garden_planner", json!({"interfaces": ["soil"]}), ValidationResult::approved());

        let ctx = generator(Arc::new(OfflineOracle), &state)
            .generate(&emitter, &RunControl::unbounded(), "root_system", &change)
            .await
            .unwrap();
        assert!(ctx.rich_context.is_none());
        assert!(ctx.adaptation_guidance.is_none());
        assert_eq!(ctx, basic_context("root_system", &change));

        let stored: Option<PropagationContext> =
            state.get_json(&keys::context("req-1", "root_system")).await.unwrap();
        assert_eq!(stored, Some(ctx));
    }

    #[tokio::test]
    async fn test_rich_context_and_guidance() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply(PromptKind::ContextGeneration, json!({"rich_context": {"update_summary": "soil v2"}}))
                .reply(PromptKind::Reflection, accepted_reflection(9))
                .reply(PromptKind::AdaptationGuidance, json!({"adaptation_guidance": {"steps": []}}))
                .reply(PromptKind::Reflection, accepted_reflection(8)),
        );
        let state = StateManager::spawn_memory();
        let bus = EventBus::with_default_capacity();
        let change = Change::new("garden_planner", json!({}), ValidationResult::approved());

        let ctx = generator(oracle.clone(), &state)
            .generate(&bus.emitter_for("req-2"), &RunControl::unbounded(), "root_system", &change)
            .await
            .unwrap();
        assert_eq!(ctx.rich_context, Some(json!({"update_summary": "soil v2"})));
        assert_eq!(ctx.adaptation_guidance, Some(json!({"steps": []})));

        let rich_input = &oracle.contexts(PromptKind::ContextGeneration)[0];
        assert_eq!(rich_input["target_role"], "roots");
        let guidance_input = &oracle.contexts(PromptKind::AdaptationGuidance)[0];
        assert_eq!(guidance_input["context"]["rich_context"]["update_summary"], "soil v2");
    }

    #[tokio::test]
    async fn test_stopped_run_skips_oracle() {
        let oracle = Arc::new(
            ScriptedOracle::new().reply(PromptKind::ContextGeneration, json!({"rich_context": {"v": 1}})),
        );
        let state = StateManager::spawn_memory();
        let bus = EventBus::with_default_capacity();
        let change = Change::new("garden_planner", json!({"behavior": "x"}), ValidationResult::approved());
        let (control, handle) = RunControl::new(None);
        handle.cancel();

        let ctx = generator(oracle.clone(), &state)
            .generate(&bus.emitter_for("req-3"), &control, "root_system", &change)
            .await
            .unwrap();
        assert_eq!(ctx, basic_context("root_system", &change));
        assert_eq!(oracle.total_calls(), 0);
    }
}
