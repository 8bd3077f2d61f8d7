//! Server event types and event bus for status notifications.
//!
//! The pipeline's caller emits a [`ServerEvent`] whenever a contract's
//! lifecycle status changes; the SSE status stream subscribes and forwards
//! changes to polling clients without a sleep-and-recheck loop.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::defaults;
use crate::models::ContractStatus;

/// Event broadcast to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A contract's lifecycle status changed.
    ContractStatus {
        contract_id: Uuid,
        status: ContractStatus,
    },
}

/// Process-wide broadcast bus for server events.
///
/// Subscribers that lag are allowed to miss events; the status stream always
/// re-reads the current status on connect so a missed transition is not a
/// correctness problem.
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Emit an event to all current subscribers. Lossy when nobody listens.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
