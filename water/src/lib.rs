//! Water - guideline-update propagation coordinator
//!
//! When an upstream validator approves a change to one component's guideline,
//! Water works out which downstream components depend on it, prepares a
//! tailored context for each, asks every target whether it can take the
//! change, and applies it only if all of them agree.
//!
//! # Modules
//!
//! - [`propagation`] - The coordinator and its phases
//! - [`graph`] - Dependency graph and propagation ordering
//! - [`impact`] - Impact scoring
//! - [`reflection`] - Reflection/revision quality loop
//! - [`oracle`] - Oracle trait, LLM-backed and offline implementations
//! - [`collaborator`] - Target component trait and registry
//! - [`domain`] - Changes, contexts, readiness signals and records
//! - [`state`] - Durable state store actor
//! - [`events`] - Event bus and JSONL event logger
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod collaborator;
pub mod config;
pub mod domain;
pub mod events;
pub mod graph;
pub mod impact;
pub mod llm;
pub mod oracle;
pub mod prompts;
pub mod propagation;
pub mod reflection;
pub mod state;

// Re-export commonly used types
pub use collaborator::{CollaboratorError, CollaboratorRegistry, GuidelineComponent, TargetComponent};
pub use config::Config;
pub use domain::{Change, PropagationContext, PropagationRecord, ReadinessSignal, RunStatus, ValidationResult};
pub use events::{EventBus, EventEmitter, WaterEvent, create_event_bus, spawn_event_logger};
pub use graph::{DependencyGraph, DependencyOrderer, StaticGraph};
pub use impact::ImpactScorer;
pub use llm::{AnthropicClient, LlmClient, LlmError, create_client};
pub use oracle::{OfflineOracle, Oracle, OracleError, PromptKind, create_oracle};
pub use propagation::{CancelHandle, CoordinationError, Coordinator, RunControl, spawn_validation_listener};
pub use reflection::ReflectionLoop;
pub use state::{StateError, StateManager, StateResponse};
