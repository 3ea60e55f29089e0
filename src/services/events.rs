//! Event system for intake operations
//!
//! Services announce staging and commit outcomes on a broadcast bus so an
//! intake UI can refresh or an audit log can follow along.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::category::Category;
use crate::record_store::RecordId;
use crate::submission::Submitter;

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum IntakeEvent {
    // Staging events
    Staged {
        submitter: Submitter,
        category: Category,
        id: RecordId,
        attachments: usize,
    },
    StagedDeleted {
        submitter: Submitter,
        category: Category,
        id: RecordId,
    },
    StagingCleared {
        submitter: Submitter,
        category: Category,
        removed: usize,
    },

    // Commit events
    Committed {
        submitter: Submitter,
        category: Category,
        staged_id: RecordId,
        committed_id: RecordId,
        attachment_refs: usize,
    },
    CommitFailed {
        submitter: Submitter,
        category: Category,
        staged_id: RecordId,
        error: String,
    },
    CommitFinished {
        submitter: Submitter,
        category: Category,
        committed: usize,
        total: usize,
    },

    // Permanent store events
    CommittedDeleted {
        category: Category,
        id: RecordId,
    },
    DocumentUploaded {
        submitter: Submitter,
        id: RecordId,
        reference: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &IntakeEvent);
}

/// Event bus for broadcasting intake events
pub struct EventBus {
    sender: broadcast::Sender<IntakeEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: IntakeEvent) {
        trace!(event = ?event, "Emitting intake event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntakeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &IntakeEvent) {
        match event {
            IntakeEvent::Committed {
                submitter,
                category,
                staged_id,
                committed_id,
                attachment_refs,
            } => {
                debug!(
                    submitter = %submitter,
                    category = %category,
                    staged_id = %staged_id,
                    committed_id = %committed_id,
                    attachment_refs,
                    "Record committed"
                );
            }
            IntakeEvent::CommitFailed {
                submitter,
                category,
                staged_id,
                error,
            } => {
                warn!(
                    submitter = %submitter,
                    category = %category,
                    staged_id = %staged_id,
                    error = %error,
                    "Record left staged"
                );
            }
            IntakeEvent::CommitFinished {
                submitter,
                category,
                committed,
                total,
            } => {
                info!(submitter = %submitter, category = %category, committed, total, "Commit finished");
            }
            _ => {
                trace!(event = ?event, "Intake event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(IntakeEvent::Staged {
            submitter: Submitter::new("Hospital A").unwrap(),
            category: Category::Award,
            id: RecordId(4),
            attachments: 2,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            IntakeEvent::Staged { id, attachments, .. } => {
                assert_eq!(id, RecordId(4));
                assert_eq!(attachments, 2);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(IntakeEvent::CommittedDeleted {
            category: Category::Publication,
            id: RecordId(1),
        });
    }
}
