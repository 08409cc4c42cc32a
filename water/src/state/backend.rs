//! Storage backends owned by the StateManager actor

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use super::messages::{StateError, StateResponse};

/// Key/value storage contract
///
/// Backends are driven from a single actor task, so they need `Send` but
/// not `Sync`.
pub trait StateBackend: Send + 'static {
    /// Insert or replace the value stored under `key`
    fn put(&mut self, key: &str, value: &Value) -> StateResponse<()>;

    fn get(&self, key: &str) -> StateResponse<Option<Value>>;

    /// Entries whose key starts with `prefix`, sorted by key
    fn list_prefix(&self, prefix: &str) -> StateResponse<Vec<(String, Value)>>;
}

/// In-memory backend for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, Value>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryBackend {
    fn put(&mut self, key: &str, value: &Value) -> StateResponse<()> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> StateResponse<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn list_prefix(&self, prefix: &str) -> StateResponse<Vec<(String, Value)>> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// SQLite backend with a single `kv` table
pub struct SqliteBackend {
    conn: Connection,
}

fn store_err(e: rusqlite::Error) -> StateError {
    StateError::StoreError(e.to_string())
}

impl SqliteBackend {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StateResponse<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SqliteBackend::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StateError::StoreError(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    /// In-memory SQLite database
    pub fn open_in_memory() -> StateResponse<Self> {
        debug!("SqliteBackend::open_in_memory: called");
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> StateResponse<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(store_err)?;
        info!("SQLite state store ready");
        Ok(Self { conn })
    }
}

impl StateBackend for SqliteBackend {
    fn put(&mut self, key: &str, value: &Value) -> StateResponse<()> {
        let text = serde_json::to_string(value)?;
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, text, Utc::now().to_rfc3339()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> StateResponse<Option<Value>> {
        let text: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(store_err)?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn list_prefix(&self, prefix: &str) -> StateResponse<Vec<(String, Value)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(store_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, text) = row.map_err(store_err)?;
            entries.push((key, serde_json::from_str(&text)?));
        }
        Ok(entries)
    }
}
