//! Domain event publication
//!
//! Events are fire-and-forget: `publish` never blocks the control path and
//! never surfaces an error into a decision or a monitoring tick. The durable
//! implementation enqueues to a disk-backed queue that a background uploader
//! drains to the broker bridge.

mod queue;
mod uploader;

pub use queue::{EventQueue, QueueError};
pub use uploader::EventUploader;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Broker topics the controller publishes to
pub mod topics {
    pub const AWD_CONTROL_COMMANDS: &str = "AWD_CONTROL_COMMANDS";
    pub const AWD_IRRIGATION_EVENTS: &str = "AWD_IRRIGATION_EVENTS";
    pub const ALERT_NOTIFICATIONS: &str = "ALERT_NOTIFICATIONS";
    pub const GATE_CONTROL_COMMANDS: &str = "GATE_CONTROL_COMMANDS";
    pub const GATE_STATUS_UPDATES: &str = "GATE_STATUS_UPDATES";
}

/// A durable domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Idempotency key for queue/broker retry
    pub id: String,
    pub topic: String,
    /// Event kind within the topic (e.g. `irrigation_started`, `phase_change`)
    pub kind: String,
    pub field_id: String,
    #[serde(default)]
    pub schedule_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        topic: &str,
        kind: &str,
        field_id: &str,
        schedule_id: Option<Uuid>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{kind}-{field_id}-{}", timestamp.timestamp_millis()),
            topic: topic.to_string(),
            kind: kind.to_string(),
            field_id: field_id.to_string(),
            schedule_id,
            payload,
            timestamp,
        }
    }
}

/// Sink for domain events
///
/// Implementations must be non-blocking and infallible from the caller's
/// point of view; delivery problems are their own to log and retry.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Durable publisher writing to the disk-backed [`EventQueue`]
pub struct QueuePublisher {
    queue: std::sync::Arc<EventQueue>,
}

impl QueuePublisher {
    pub fn new(queue: std::sync::Arc<EventQueue>) -> Self {
        Self { queue }
    }
}

impl EventPublisher for QueuePublisher {
    fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.queue.enqueue(&event) {
            warn!(
                topic = %event.topic,
                kind = %event.kind,
                error = %e,
                "Failed to enqueue domain event"
            );
        }
    }
}

/// In-process publisher collecting events for tests and replay tooling
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of_kind(&self, kind: &str) -> Vec<DomainEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl EventPublisher for MemoryPublisher {
    fn publish(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
