//! Service layer for intake-store
//!
//! Services hold the intake rules between a UI layer and the two gateways.
//! Each service wraps gateway calls with:
//! - Per-call timeouts
//! - Submitter scoping
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! UI layer / intake-admin
//!     ↓
//! Service Layer (staging, commit, records, documents)
//!     ↓
//! Gateways (RecordStore, ObjectStore)
//!     ↓
//! SQLite database + bucket directories
//! ```

pub mod commit;
pub mod documents;
pub mod events;
pub mod records;
pub mod staging;

// Re-exports
pub use commit::{CommitCoordinator, CommitReport, DroppedAttachment, RecordOutcome};
pub use documents::{DocumentService, SummaryDocument, WorkSummary};
pub use events::{EventBus, EventListener, IntakeEvent};
pub use records::{CategoryCount, DeleteOutcome, RecordService, SubmissionOverview};
pub use staging::StagingManager;

use std::sync::Arc;
use std::time::Duration;

use crate::category::Category;
use crate::config::Config;
use crate::object_store::ObjectStore;
use crate::record_store::RecordStore;
use crate::submission::SubmissionLimits;

/// Settings shared by every service
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub images_bucket: String,
    pub documents_bucket: String,
    pub call_timeout: Duration,
    pub limits: SubmissionLimits,
}

impl ServiceSettings {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Bucket that materialized attachments of a category go to
    pub fn bucket_for(&self, category: Category) -> &str {
        if category.schema().attachments.is_document() {
            &self.documents_bucket
        } else {
            &self.images_bucket
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            images_bucket: config.images_bucket.clone(),
            documents_bucket: config.documents_bucket.clone(),
            call_timeout: config.call_timeout(),
            limits: SubmissionLimits::from(config),
        }
    }
}

/// Service container for dependency injection
///
/// Holds all services over one record store and one object store.
pub struct Services {
    pub staging: Arc<StagingManager>,
    pub commit: Arc<CommitCoordinator>,
    pub records: Arc<RecordService>,
    pub documents: Arc<DocumentService>,
    pub events: Arc<EventBus>,
    pub settings: ServiceSettings,
    record_store: Arc<dyn RecordStore>,
    object_store: Arc<dyn ObjectStore>,
}

impl Services {
    /// Create all services sharing the given gateways
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        settings: ServiceSettings,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let staging = Arc::new(StagingManager::new(
            records.clone(),
            events.clone(),
            settings.call_timeout,
        ));

        Self {
            commit: Arc::new(CommitCoordinator::new(
                staging.clone(),
                records.clone(),
                objects.clone(),
                events.clone(),
                settings.clone(),
            )),
            records: Arc::new(RecordService::new(
                records.clone(),
                objects.clone(),
                events.clone(),
                settings.clone(),
            )),
            documents: Arc::new(DocumentService::new(
                records.clone(),
                objects.clone(),
                events.clone(),
                settings.clone(),
            )),
            staging,
            events,
            settings,
            record_store: records,
            object_store: objects,
        }
    }

    /// Commit coordinator that stops between records once `cancel` reads `true`
    pub fn cancellable_commit(&self, cancel: tokio::sync::watch::Receiver<bool>) -> CommitCoordinator {
        CommitCoordinator::new(
            self.staging.clone(),
            self.record_store.clone(),
            self.object_store.clone(),
            self.events.clone(),
            self.settings.clone(),
        )
        .with_cancellation(cancel)
    }
}
