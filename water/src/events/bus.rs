//! Event Bus - central pub/sub system for Water events
//!
//! The EventBus uses tokio broadcast channels to deliver events to all
//! subscribers. Components emit events, consumers (loggers, triggers) subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::WaterEvent;
use crate::domain::{PropagationRecord, RunPhase};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus for propagation activity
pub struct EventBus {
    tx: broadcast::Sender<WaterEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: WaterEvent) {
        debug!(
            event_type = event.event_type(),
            request_id = event.request_id(),
            "EventBus::emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<WaterEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one run
    pub fn emitter_for(&self, request_id: impl Into<String>) -> EventEmitter {
        let request_id = request_id.into();
        debug!(%request_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            request_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events for one run without owning the bus
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<WaterEvent>,
    request_id: String,
}

impl EventEmitter {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: WaterEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn requested(&self, origin_id: &str, change_id: &str) {
        self.emit(WaterEvent::PropagationRequested {
            request_id: self.request_id.clone(),
            origin_id: origin_id.to_string(),
            change_id: change_id.to_string(),
        });
    }

    pub fn phase(&self, phase: RunPhase, affected_count: usize) {
        self.emit(WaterEvent::PropagationPhase {
            request_id: self.request_id.clone(),
            phase,
            affected_count,
        });
    }

    /// Emit the terminal event matching the record's status
    pub fn finished(&self, record: &PropagationRecord) {
        use crate::domain::RunStatus;
        match record.status {
            RunStatus::Succeeded | RunStatus::Failed => self.emit(WaterEvent::PropagationCompleted {
                request_id: self.request_id.clone(),
                success: record.success,
                affected_count: record.metrics.affected_count,
                success_count: record.metrics.success_count,
                failure_count: record.metrics.failure_count,
            }),
            RunStatus::Rejected => self.emit(WaterEvent::PropagationRejected {
                request_id: self.request_id.clone(),
                rejection_count: record.metrics.rejection_count,
            }),
            RunStatus::Cancelled => self.cancelled("run cancelled"),
        }
    }

    pub fn cancelled(&self, reason: &str) {
        self.emit(WaterEvent::PropagationCancelled {
            request_id: self.request_id.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn revision_completed(
        &self,
        phase: &str,
        scope: &str,
        iteration: u32,
        quality: Option<f64>,
        confidence: Option<f64>,
    ) {
        self.emit(WaterEvent::RevisionCompleted {
            request_id: self.request_id.clone(),
            phase: phase.to_string(),
            scope: scope.to_string(),
            iteration,
            quality,
            confidence,
        });
    }

    pub fn warning(&self, context: &str, message: &str) {
        self.emit(WaterEvent::Warning {
            request_id: self.request_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropagationRequest;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        bus.emitter_for("r1").requested("a", "c1");
    }

    #[tokio::test]
    async fn test_event_emitter() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("r1");

        emitter.requested("garden_planner", "upd-1");
        emitter.phase(RunPhase::Discovered, 3);
        emitter.revision_completed("context", "root_system", 1, Some(8.0), None);
        emitter.warning("oracle", "unavailable");

        for expected in ["propagation.requested", "propagation.phase", "revision.completed", "warning"] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.request_id(), "r1");
            assert_eq!(event.event_type(), expected);
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_finished_emits_by_status() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("r1");

        let mut request = PropagationRequest::new("r1", "a", "c1");
        request.affected = vec!["b".to_string()];

        emitter.finished(&PropagationRecord::no_targets(&request));
        emitter.finished(&PropagationRecord::rejected(&request, vec![]));
        emitter.finished(&PropagationRecord::cancelled(&request, Default::default(), vec![]));

        assert_eq!(rx.recv().await.unwrap().event_type(), "propagation.completed");
        assert_eq!(rx.recv().await.unwrap().event_type(), "propagation.rejected");
        assert_eq!(rx.recv().await.unwrap().event_type(), "propagation.cancelled");
    }
}
