//! StateManager - actor that owns the storage backend
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::backend::{MemoryBackend, SqliteBackend, StateBackend};
use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a StateManager actor over the given backend
    pub fn spawn(backend: impl StateBackend) -> Self {
        debug!("StateManager::spawn: called");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(Box::new(backend), rx));
        info!("StateManager spawned");
        Self { tx }
    }

    /// Spawn over a SQLite database at `path`
    pub fn spawn_sqlite(path: impl AsRef<Path>) -> StateResponse<Self> {
        debug!(path = %path.as_ref().display(), "StateManager::spawn_sqlite: called");
        Ok(Self::spawn(SqliteBackend::open(path)?))
    }

    /// Spawn over an in-memory map
    pub fn spawn_memory() -> Self {
        Self::spawn(MemoryBackend::new())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Upsert a raw value
    pub async fn put(&self, key: &str, value: Value) -> StateResponse<()> {
        debug!(%key, "put: called");
        let key = key.to_string();
        self.request(|reply| StateCommand::Put { key, value, reply }).await
    }

    pub async fn get(&self, key: &str) -> StateResponse<Option<Value>> {
        debug!(%key, "get: called");
        let key = key.to_string();
        self.request(|reply| StateCommand::Get { key, reply }).await
    }

    /// List entries under a key prefix, sorted by key
    pub async fn list_prefix(&self, prefix: &str) -> StateResponse<Vec<(String, Value)>> {
        debug!(%prefix, "list_prefix: called");
        let prefix = prefix.to_string();
        self.request(|reply| StateCommand::ListPrefix { prefix, reply }).await
    }

    /// Serialize and upsert a typed value
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StateResponse<()> {
        self.put(key, serde_json::to_value(value)?).await
    }

    /// Fetch and deserialize a typed value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StateResponse<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Fetch a typed value that must exist
    pub async fn require_json<T: DeserializeOwned>(&self, key: &str) -> StateResponse<T> {
        self.get_json(key)
            .await?
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

async fn actor_loop(mut backend: Box<dyn StateBackend>, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Put { key, value, reply } => {
                debug!(%key, "actor_loop: Put command");
                let _ = reply.send(backend.put(&key, &value));
            }

            StateCommand::Get { key, reply } => {
                debug!(%key, "actor_loop: Get command");
                let _ = reply.send(backend.get(&key));
            }

            StateCommand::ListPrefix { prefix, reply } => {
                debug!(%prefix, "actor_loop: ListPrefix command");
                let _ = reply.send(backend.list_prefix(&prefix));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }
}
