//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and appends every event to a
//! per-run JSONL file: `<events-dir>/<request-id>/events.jsonl`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, WaterEvent};
use crate::domain::slugify;

/// Event logger that writes events to JSONL files
pub struct EventLogger {
    runs_dir: PathBuf,
    /// Open file writers per run
    writers: HashMap<String, BufWriter<File>>,
}

fn run_dir(runs_dir: &Path, request_id: &str) -> PathBuf {
    runs_dir.join(slugify(request_id))
}

impl EventLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its run's log file
    pub fn write_event(&mut self, event: &WaterEvent) -> eyre::Result<()> {
        let request_id = event.request_id();
        debug!(%request_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = match self.writers.entry(request_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let dir = run_dir(&self.runs_dir, request_id);
                fs::create_dir_all(&dir)?;
                let log_path = dir.join("events.jsonl");
                debug!(?log_path, "EventLogger: creating new log file");
                let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
                entry.insert(BufWriter::new(file))
            }
        };

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Close the writer for a finished run
    pub fn close_run(&mut self, request_id: &str) {
        debug!(%request_id, "EventLogger::close_run");
        if let Some(mut writer) = self.writers.remove(request_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events until every sender is gone
    async fn drain(&mut self, rx: &mut broadcast::Receiver<WaterEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let request_id = event.request_id().to_string();
                    let terminal = matches!(
                        event,
                        WaterEvent::PropagationCompleted { .. }
                            | WaterEvent::PropagationRejected { .. }
                            | WaterEvent::PropagationCancelled { .. }
                    );

                    if let Err(e) = self.write_event(&event) {
                        error!(%request_id, error = %e, "EventLogger: failed to write event");
                    }
                    if terminal {
                        self.close_run(&request_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (request_id, mut writer) in self.writers.drain() {
            debug!(%request_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back the events logged for one run
pub fn read_run_events(runs_dir: impl AsRef<Path>, request_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = run_dir(runs_dir.as_ref(), request_id).join("events.jsonl");
    debug!(?log_path, "read_run_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_run_events: failed to parse line"),
        }
    }
    debug!(count = entries.len(), "read_run_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>, runs_dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(runs_dir);
    // Subscribe before returning so no event emitted afterwards is missed
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        let mut logger = logger;
        debug!("spawn_event_logger: starting event logger");
        logger.drain(&mut rx).await;
    })
}
