//! Event types for propagation activity
//!
//! These events represent all observable activity in a coordination run:
//! - Run lifecycle (requested, phase boundaries, completed/rejected/cancelled)
//! - Reflection/revision iterations
//! - Upstream triggers (validation results, explicit update requests)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Change, RunPhase};

/// Core event enum - the vocabulary of Water activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WaterEvent {
    // === Run lifecycle ===
    #[serde(rename = "propagation.requested")]
    PropagationRequested {
        request_id: String,
        origin_id: String,
        change_id: String,
    },
    /// A durable snapshot was written at a phase boundary
    #[serde(rename = "propagation.phase")]
    PropagationPhase {
        request_id: String,
        phase: RunPhase,
        affected_count: usize,
    },
    #[serde(rename = "propagation.completed")]
    PropagationCompleted {
        request_id: String,
        success: bool,
        affected_count: usize,
        success_count: usize,
        failure_count: usize,
    },
    #[serde(rename = "propagation.rejected")]
    PropagationRejected { request_id: String, rejection_count: usize },
    #[serde(rename = "propagation.cancelled")]
    PropagationCancelled { request_id: String, reason: String },

    // === Quality loop ===
    /// One reflection/revision iteration finished
    #[serde(rename = "revision.completed")]
    RevisionCompleted {
        request_id: String,
        phase: String,
        scope: String,
        iteration: u32,
        quality: Option<f64>,
        confidence: Option<f64>,
    },

    // === Upstream triggers ===
    /// An upstream validator finished with a verdict for a change
    #[serde(rename = "validation.completed")]
    ValidationCompleted {
        change: Change,
        #[serde(default)]
        auto_propagate: bool,
    },
    /// Someone explicitly asked for a change to be propagated
    #[serde(rename = "update.requested")]
    UpdateRequested { change: Change },

    // === Warnings ===
    /// A degraded path was taken (oracle fallback and similar)
    #[serde(rename = "warning")]
    Warning {
        request_id: String,
        context: String,
        message: String,
    },
}

impl WaterEvent {
    /// Get the id this event is filed under
    ///
    /// Trigger events are not bound to a run yet; they are filed under the
    /// change id.
    pub fn request_id(&self) -> &str {
        match self {
            WaterEvent::PropagationRequested { request_id, .. }
            | WaterEvent::PropagationPhase { request_id, .. }
            | WaterEvent::PropagationCompleted { request_id, .. }
            | WaterEvent::PropagationRejected { request_id, .. }
            | WaterEvent::PropagationCancelled { request_id, .. }
            | WaterEvent::RevisionCompleted { request_id, .. }
            | WaterEvent::Warning { request_id, .. } => request_id,
            WaterEvent::ValidationCompleted { change, .. } | WaterEvent::UpdateRequested { change } => {
                &change.change_id
            }
        }
    }

    /// Get the dotted event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            WaterEvent::PropagationRequested { .. } => "propagation.requested",
            WaterEvent::PropagationPhase { .. } => "propagation.phase",
            WaterEvent::PropagationCompleted { .. } => "propagation.completed",
            WaterEvent::PropagationRejected { .. } => "propagation.rejected",
            WaterEvent::PropagationCancelled { .. } => "propagation.cancelled",
            WaterEvent::RevisionCompleted { .. } => "revision.completed",
            WaterEvent::ValidationCompleted { .. } => "validation.completed",
            WaterEvent::UpdateRequested { .. } => "update.requested",
            WaterEvent::Warning { .. } => "warning",
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: WaterEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: WaterEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
