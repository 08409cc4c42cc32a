//! Target-component collaborators
//!
//! Every pipeline component that can receive a propagated change implements
//! [`TargetComponent`]. The coordinator only ever reaches components through
//! a [`CollaboratorRegistry`]; components never hold a reference back.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Change, Concern, PropagationContext};

mod guideline;

pub use guideline::GuidelineComponent;

/// Collaborator failures, scoped to one target
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collaborator call failed: {0}")]
    Failed(String),

    #[error("No collaborator registered for {0}")]
    Missing(String),
}

/// Answer to a readiness check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReply {
    pub ready: bool,
    #[serde(default)]
    pub concerns: Vec<Concern>,
    #[serde(default)]
    pub adaptations_needed: Vec<String>,
}

impl ReadinessReply {
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    pub fn not_ready(concerns: Vec<Concern>) -> Self {
        Self {
            ready: false,
            concerns,
            adaptations_needed: Vec::new(),
        }
    }
}

/// Answer to an apply request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApplyReply {
    pub fn applied() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            details: None,
        }
    }
}

/// Answer to a verification request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyReply {
    pub verified: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl VerifyReply {
    pub fn verified() -> Self {
        Self {
            verified: true,
            errors: Vec::new(),
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            errors: vec![error.into()],
        }
    }
}

/// A component that can receive propagated changes
#[async_trait]
pub trait TargetComponent: Send + Sync {
    fn id(&self) -> &str;

    /// May the change described by `context` be applied to this component?
    async fn check_readiness(
        &self,
        origin_id: &str,
        context: &PropagationContext,
    ) -> Result<ReadinessReply, CollaboratorError>;

    async fn apply_update(
        &self,
        origin_id: &str,
        context: &PropagationContext,
        guidance: Option<&Value>,
        change: &Change,
    ) -> Result<ApplyReply, CollaboratorError>;

    async fn verify_update(&self, update_id: &str) -> Result<VerifyReply, CollaboratorError>;
}

/// Collaborators by component id
#[derive(Clone, Default)]
pub struct CollaboratorRegistry {
    components: BTreeMap<String, Arc<dyn TargetComponent>>,
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: Arc<dyn TargetComponent>) {
        debug!(id = component.id(), "register: called");
        self.components.insert(component.id().to_string(), component);
    }

    pub fn with(mut self, component: Arc<dyn TargetComponent>) -> Self {
        self.register(component);
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn TargetComponent>, CollaboratorError> {
        self.components
            .get(id)
            .cloned()
            .ok_or_else(|| CollaboratorError::Missing(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub async fn check_readiness(
        &self,
        target: &str,
        origin_id: &str,
        context: &PropagationContext,
        timeout: Duration,
    ) -> Result<ReadinessReply, CollaboratorError> {
        let component = self.get(target)?;
        with_timeout(timeout, component.check_readiness(origin_id, context)).await
    }

    pub async fn apply_update(
        &self,
        target: &str,
        origin_id: &str,
        context: &PropagationContext,
        change: &Change,
        timeout: Duration,
    ) -> Result<ApplyReply, CollaboratorError> {
        let component = self.get(target)?;
        let guidance = context.adaptation_guidance.as_ref();
        with_timeout(timeout, component.apply_update(origin_id, context, guidance, change)).await
    }

    pub async fn verify_update(
        &self,
        target: &str,
        update_id: &str,
        timeout: Duration,
    ) -> Result<VerifyReply, CollaboratorError> {
        let component = self.get(target)?;
        with_timeout(timeout, component.verify_update(update_id)).await
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(timeout)))
}
