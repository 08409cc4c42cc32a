//! Event-driven entry point
//!
//! Starts a propagation run for every validated change announced on the bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::coordinator::Coordinator;
use crate::domain::Change;
use crate::events::{EventBus, WaterEvent};

/// Spawn the listener that turns validation events into runs
///
/// `validation.completed` starts a run only when the verdict is propagatable
/// and the validator asked for auto-propagation; `update.requested` always
/// starts one. Each run gets its own task so a slow run never blocks the
/// listener.
pub fn spawn_validation_listener(coordinator: Arc<Coordinator>, bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        debug!("spawn_validation_listener: listening");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(change) = trigger_for(event) {
                        let coordinator = coordinator.clone();
                        tokio::spawn(async move { run(coordinator, change).await });
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "validation listener lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("validation listener: channel closed, shutting down");
                    break;
                }
            }
        }
    })
}

fn trigger_for(event: WaterEvent) -> Option<Change> {
    match event {
        WaterEvent::ValidationCompleted { change, auto_propagate } => {
            let category = change.validation_result.category;
            if category.is_propagatable() && auto_propagate {
                Some(change)
            } else {
                debug!(change_id = %change.change_id, ?category, auto_propagate, "trigger_for: not propagating");
                None
            }
        }
        WaterEvent::UpdateRequested { change } => Some(change),
        _ => None,
    }
}

async fn run(coordinator: Arc<Coordinator>, change: Change) {
    info!(change_id = %change.change_id, origin_id = %change.origin_id, "triggered propagation");
    if let Err(e) = coordinator.coordinate(&change).await {
        error!(change_id = %change.change_id, error = %e, "triggered propagation failed");
    }
}
