//! State management with actor pattern
//!
//! StateManager owns a key/value backend and processes messages via
//! channels, providing shared access to durable run state.

mod backend;
pub mod keys;
mod manager;
mod messages;

pub use backend::{MemoryBackend, SqliteBackend, StateBackend};
pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
