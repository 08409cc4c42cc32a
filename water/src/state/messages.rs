//! State manager messages
//!
//! Commands and responses for the actor pattern.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from state operations
///
/// Any of these is fatal to a coordination run: a run never reports a
/// result it could not persist.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    /// Insert or replace the value under a key
    Put {
        key: String,
        value: Value,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Get {
        key: String,
        reply: oneshot::Sender<StateResponse<Option<Value>>>,
    },
    /// All entries whose key starts with the prefix, sorted by key
    ListPrefix {
        prefix: String,
        reply: oneshot::Sender<StateResponse<Vec<(String, Value)>>>,
    },
    Shutdown,
}
