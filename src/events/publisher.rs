use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Document, ErrorKind};
use crate::state_machine::DeliveryStatus;

/// Terminal outcome broadcast to downstream consumers (REST polling,
/// push relays) after the state transition committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    pub document_id: Uuid,
    pub project_id: Uuid,
    pub status: DeliveryStatus,
    pub sunat_status: Option<String>,
    pub error: Option<ErrorKind>,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher for document lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<DocumentEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a terminal event for a document. Publishing with no
    /// subscribers is fine; events are best-effort notifications.
    pub fn publish(&self, document: &Document) {
        let event = DocumentEvent {
            document_id: document.id,
            project_id: document.project_id,
            status: document.delivery_status,
            sunat_status: document.sunat_status.clone(),
            error: document.error,
            published_at: Utc::now(),
        };

        if self.sender.send(event).is_err() {
            tracing::trace!(document_id = %document.id, "no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
