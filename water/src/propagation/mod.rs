//! Propagation protocol
//!
//! A run moves a validated change through four phases, writing a durable
//! snapshot at each boundary:
//!
//! ```text
//!   requested ──> discovered ──> prepared ──┬──> committed
//!                     │                     └──> rejected (any target not ready)
//!                     └──> committed (no affected targets)
//! ```
//!
//! Cancellation is observed at every phase boundary and before each
//! per-target call; a cancelled run ends in `cancelled`.

pub mod context;
pub mod control;
mod coordinator;
pub mod executor;
pub mod readiness;
mod trigger;

pub use context::{ContextGenerator, basic_context};
pub use control::{CancelHandle, RunControl};
pub use coordinator::{CoordinationError, Coordinator, PHASE_ANALYSIS};
pub use executor::{ExecutionOutcome, PropagationExecutor};
pub use readiness::{Interrupted, ReadinessCollector};
pub use trigger::spawn_validation_listener;
