//! State-backed guideline component

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::{ApplyReply, CollaboratorError, ReadinessReply, TargetComponent, VerifyReply};
use crate::domain::{AdaptationKind, Change, Concern, ConcernKind, PropagationContext};
use crate::state::{StateError, StateManager, keys};

/// Update record status once the guideline was rewritten
const STATUS_APPLIED: &str = "applied";

/// A component whose guideline lives in the state store
///
/// Readiness fails while the component is marked busy or when the change
/// needs an adaptation the component does not support.
pub struct GuidelineComponent {
    id: String,
    state: StateManager,
    supported: BTreeSet<AdaptationKind>,
}

impl GuidelineComponent {
    /// A component supporting every adaptation kind
    pub fn new(id: impl Into<String>, state: StateManager) -> Self {
        Self {
            id: id.into(),
            state,
            supported: [
                AdaptationKind::InterfaceAdaptation,
                AdaptationKind::BehavioralAdaptation,
                AdaptationKind::DependencyAdaptation,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn with_supported(mut self, supported: impl IntoIterator<Item = AdaptationKind>) -> Self {
        self.supported = supported.into_iter().collect();
        self
    }

    /// Mark the component busy (or idle) for readiness checks
    pub async fn set_busy(&self, busy: bool) -> Result<(), StateError> {
        self.state.put(&keys::busy(&self.id), json!(busy)).await
    }

    pub async fn guideline(&self) -> Result<Value, StateError> {
        Ok(self
            .state
            .get(&keys::guideline(&self.id))
            .await?
            .unwrap_or_else(|| json!({})))
    }

    fn unsupported(&self, context: &PropagationContext) -> Vec<AdaptationKind> {
        context
            .adaptation_kinds()
            .into_iter()
            .filter(|kind| !self.supported.contains(kind))
            .collect()
    }

    async fn write_update(&self, update_id: &str, record: Value) -> Result<(), CollaboratorError> {
        self.state
            .put(&keys::update(&self.id, update_id), record)
            .await
            .map_err(failed)
    }
}

fn failed(e: StateError) -> CollaboratorError {
    CollaboratorError::Failed(e.to_string())
}

/// Rewrite a guideline for the adaptations a change requires
fn adapt_guideline(guideline: &mut Map<String, Value>, payload: &Value, kinds: &[AdaptationKind]) {
    for kind in kinds {
        match kind {
            AdaptationKind::InterfaceAdaptation => {
                if let Some(interfaces) = payload.get("interfaces") {
                    guideline.insert("interfaces".to_string(), interfaces.clone());
                }
            }
            AdaptationKind::BehavioralAdaptation => {
                if let Some(behavior) = payload.get("behavior") {
                    guideline.insert("behavior".to_string(), behavior.clone());
                }
            }
            AdaptationKind::DependencyAdaptation => {
                let Some(incoming) = payload.get("dependencies").and_then(Value::as_array) else {
                    continue;
                };
                let entry = guideline
                    .entry("dependencies")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(existing) = entry {
                    for dep in incoming {
                        if !existing.contains(dep) {
                            existing.push(dep.clone());
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TargetComponent for GuidelineComponent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check_readiness(
        &self,
        origin_id: &str,
        context: &PropagationContext,
    ) -> Result<ReadinessReply, CollaboratorError> {
        debug!(id = %self.id, %origin_id, "check_readiness: called");
        let mut concerns = Vec::new();

        let busy = self.state.get(&keys::busy(&self.id)).await.map_err(failed)?;
        if busy.as_ref().and_then(Value::as_bool).unwrap_or(false) {
            concerns.push(Concern::new(
                ConcernKind::ComponentState,
                format!("{} is busy and cannot accept updates", self.id),
            ));
        }
        for kind in self.unsupported(context) {
            concerns.push(Concern::new(
                ConcernKind::Adaptation,
                format!("{} does not support {}", self.id, kind),
            ));
        }

        Ok(ReadinessReply {
            ready: concerns.is_empty(),
            concerns,
            adaptations_needed: context.adaptation_kinds().iter().map(ToString::to_string).collect(),
        })
    }

    async fn apply_update(
        &self,
        origin_id: &str,
        context: &PropagationContext,
        guidance: Option<&Value>,
        change: &Change,
    ) -> Result<ApplyReply, CollaboratorError> {
        let update_id = change.change_id.as_str();
        debug!(id = %self.id, %origin_id, %update_id, has_guidance = guidance.is_some(), "apply_update: called");

        let unsupported = self.unsupported(context);
        if !unsupported.is_empty() {
            warn!(id = %self.id, ?unsupported, "apply_update: unsupported adaptations");
            return Ok(ApplyReply::failed(format!("unsupported adaptations: {:?}", unsupported)));
        }

        let mut record = json!({
            "update_id": update_id,
            "origin_id": origin_id,
            "update_data": change.payload,
            "required_adaptations": context.required_adaptations,
            "status": "received",
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.write_update(update_id, record.clone()).await?;

        let current = self.guideline().await.map_err(failed)?;
        let mut guideline = match current {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        adapt_guideline(&mut guideline, &change.payload, &context.adaptation_kinds());
        self.state
            .put(&keys::guideline(&self.id), Value::Object(guideline))
            .await
            .map_err(failed)?;

        record["status"] = json!(STATUS_APPLIED);
        record["timestamp"] = json!(Utc::now().to_rfc3339());
        self.write_update(update_id, record).await?;
        info!(id = %self.id, %update_id, "guideline update applied");

        Ok(ApplyReply {
            success: true,
            reason: None,
            details: Some(json!({"component": self.id, "update_id": update_id})),
        })
    }

    async fn verify_update(&self, update_id: &str) -> Result<VerifyReply, CollaboratorError> {
        debug!(id = %self.id, %update_id, "verify_update: called");
        let record = self
            .state
            .get(&keys::update(&self.id, update_id))
            .await
            .map_err(failed)?;

        Ok(match record {
            None => VerifyReply::rejected(format!("update {} not found", update_id)),
            Some(record) => match record.get("status").and_then(Value::as_str) {
                Some(STATUS_APPLIED) => VerifyReply::verified(),
                status => VerifyReply::rejected(format!(
                    "update {} not applied (status: {})",
                    update_id,
                    status.unwrap_or("unknown")
                )),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Adaptation, ValidationResult};

    fn context(kinds: &[AdaptationKind]) -> PropagationContext {
        PropagationContext {
            target_id: "root_system".to_string(),
            origin_id: "garden_planner".to_string(),
            change_id: "upd-1".to_string(),
            specific_changes: vec![],
            interface_impacts: vec![],
            behavioral_impacts: vec![],
            required_adaptations: kinds
                .iter()
                .map(|kind| Adaptation {
                    kind: *kind,
                    description: String::new(),
                })
                .collect(),
            rich_context: None,
            adaptation_guidance: None,
        }
    }

    fn change() -> Change {
        Change::new(
            "garden_planner",
            json!({
                "update_id": "upd-1",
                "interfaces": {"soil": "v2"},
                "behavior": "water twice daily",
                "dependencies": ["soil", "sun"]
            }),
            ValidationResult::approved(),
        )
    }

    #[tokio::test]
    async fn test_ready_by_default() {
        let component = GuidelineComponent::new("root_system", StateManager::spawn_memory());
        let reply = component
            .check_readiness("garden_planner", &context(&[AdaptationKind::InterfaceAdaptation]))
            .await
            .unwrap();
        assert!(reply.ready);
        assert_eq!(reply.adaptations_needed, vec!["interface_adaptation"]);
    }

    #[tokio::test]
    async fn test_busy_component_not_ready() {
        let component = GuidelineComponent::new("root_system", StateManager::spawn_memory());
        component.set_busy(true).await.unwrap();
        let reply = component.check_readiness("garden_planner", &context(&[])).await.unwrap();
        assert!(!reply.ready);
        assert_eq!(reply.concerns[0].kind, ConcernKind::ComponentState);
    }

    #[tokio::test]
    async fn test_unsupported_adaptation_not_ready() {
        let component = GuidelineComponent::new("root_system", StateManager::spawn_memory())
            .with_supported([AdaptationKind::BehavioralAdaptation]);
        let reply = component
            .check_readiness(
                "garden_planner",
                &context(&[AdaptationKind::InterfaceAdaptation, AdaptationKind::BehavioralAdaptation]),
            )
            .await
            .unwrap();
        assert!(!reply.ready);
        assert_eq!(reply.concerns.len(), 1);
        assert_eq!(reply.concerns[0].kind, ConcernKind::Adaptation);
    }

    #[tokio::test]
    async fn test_apply_rewrites_guideline_and_verifies() {
        let state = StateManager::spawn_memory();
        state
            .put(&keys::guideline("root_system"), json!({"dependencies": ["soil"], "depth": 3}))
            .await
            .unwrap();
        let component = GuidelineComponent::new("root_system", state.clone());
        let ctx = context(&[
            AdaptationKind::InterfaceAdaptation,
            AdaptationKind::BehavioralAdaptation,
            AdaptationKind::DependencyAdaptation,
        ]);

        let reply = component
            .apply_update("garden_planner", &ctx, None, &change())
            .await
            .unwrap();
        assert!(reply.success);

        let guideline = component.guideline().await.unwrap();
        assert_eq!(guideline["interfaces"], json!({"soil": "v2"}));
        assert_eq!(guideline["behavior"], "water twice daily");
        assert_eq!(guideline["dependencies"], json!(["soil", "sun"]));
        assert_eq!(guideline["depth"], 3);

        assert!(component.verify_update("upd-1").await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_apply_without_adaptations_leaves_guideline() {
        let component = GuidelineComponent::new("root_system", StateManager::spawn_memory());
        component
            .apply_update("garden_planner", &context(&[]), None, &change())
            .await
            .unwrap();
        assert_eq!(component.guideline().await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_verify_unknown_update() {
        let component = GuidelineComponent::new("root_system", StateManager::spawn_memory());
        let reply = component.verify_update("nope").await.unwrap();
        assert!(!reply.verified);
        assert!(reply.errors[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_verify_requires_applied_status() {
        let state = StateManager::spawn_memory();
        state
            .put(&keys::update("root_system", "upd-2"), json!({"status": "received"}))
            .await
            .unwrap();
        let component = GuidelineComponent::new("root_system", state);
        let reply = component.verify_update("upd-2").await.unwrap();
        assert!(!reply.verified);
        assert!(reply.errors[0].contains("status: received"));
    }
}
