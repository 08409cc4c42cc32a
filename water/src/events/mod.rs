//! Event bus for run observability
//!
//! Every phase boundary and quality-loop iteration of a coordination run
//! emits an event. Consumers (the JSONL logger, the validation trigger)
//! subscribe to the bus.
//!
//! ```text
//!   Coordinator ──┐                ┌──> EventLogger (<events-dir>/<id>/events.jsonl)
//!   Reflection ───┼──> EventBus ───┤
//!   Validators ───┘   (broadcast)  └──> validation listener ──> Coordinator
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_run_events, spawn_event_logger};
pub use types::{EventLogEntry, WaterEvent};
