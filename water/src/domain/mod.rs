//! Domain types for Water
//!
//! Changes, per-target contexts, readiness signals and the durable
//! propagation record. Everything here is plain data with serde support;
//! the protocol itself lives in [`crate::propagation`].

mod change;
mod context;
mod id;
mod readiness;
mod record;

pub use change::{Change, ChangedElement, ElementKind, ValidationCategory, ValidationResult};
pub use context::{Adaptation, AdaptationKind, Impact, PropagationContext, Severity};
pub use id::{generate_id, slugify};
pub use readiness::{Concern, ConcernKind, ReadinessSignal};
pub use record::{
    ApplyOutcome, FailureStage, PropagationRecord, PropagationRequest, REJECTION_PHASE_PRE_VALIDATION, RecordMetrics,
    RunPhase, RunStatus, TargetFailure,
};
