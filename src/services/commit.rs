//! Commit coordinator
//!
//! Moves a submitter's staged records of one category into the permanent
//! store. Each record is handled on its own:
//!
//! 1. decode attachments, dropping any that fail to decode
//! 2. upload decoded attachments, dropping any that fail to upload
//! 3. insert the permanent row with the references that were collected
//! 4. retire the staged copy once the insert succeeded
//!
//! A failed insert leaves the record staged and the loop moves on. Objects
//! uploaded for a record whose insert failed are not rolled back.
//!
//! Two commits running at once for the same submitter and category can both
//! read the same staged rows and insert them twice. Nothing here prevents it.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::category::Category;
use crate::codec;
use crate::error::IntakeError;
use crate::object_store::{self, ObjectStore, PutMode};
use crate::paths;
use crate::record_store::{with_timeout, NewRow, RecordId, RecordStore};
use crate::submission::{StagedRecord, Submitter};

use super::documents::point_work_summary;
use super::events::{EventBus, IntakeEvent};
use super::records::committed_payload;
use super::staging::StagingManager;
use super::ServiceSettings;

/// Why an attachment did not make it into the committed record
#[derive(Debug, Clone, Serialize)]
pub struct DroppedAttachment {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

/// What happened to one staged record
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub staged_id: RecordId,
    pub title: String,
    /// Set when the permanent insert succeeded
    pub committed_id: Option<RecordId>,
    pub attachment_refs: Vec<String>,
    pub dropped_attachments: Vec<DroppedAttachment>,
    /// Insert failure; the record is still staged
    pub error: Option<String>,
    /// Committed, but the staged copy could not be removed
    pub staged_copy_left: bool,
}

impl RecordOutcome {
    pub fn is_committed(&self) -> bool {
        self.committed_id.is_some()
    }
}

/// Summary of one commit invocation
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub submitter: Submitter,
    pub category: Category,
    /// Staged records found when the commit started
    pub total: usize,
    pub outcomes: Vec<RecordOutcome>,
    /// Stopped before reaching every record
    pub cancelled: bool,
}

impl CommitReport {
    fn empty(submitter: &Submitter, category: Category) -> Self {
        Self {
            submitter: submitter.clone(),
            category,
            total: 0,
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_committed()).count()
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    /// `(success, total)`
    pub fn counts(&self) -> (usize, usize) {
        (self.success_count(), self.total_count())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| !o.is_committed())
    }

    /// Records skipped because the commit was cancelled
    pub fn not_attempted(&self) -> usize {
        self.total - self.outcomes.len()
    }

    /// Records now present both staged and committed
    pub fn duplicated(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| o.staged_copy_left)
    }
}

/// Commit coordinator
pub struct CommitCoordinator {
    staging: Arc<StagingManager>,
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    events: Arc<EventBus>,
    settings: ServiceSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl CommitCoordinator {
    pub fn new(
        staging: Arc<StagingManager>,
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        events: Arc<EventBus>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            staging,
            records,
            objects,
            events,
            settings,
            cancel: None,
        }
    }

    /// Stop starting new records once the channel reads `true`
    ///
    /// A record already in progress always runs to the end.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Commit every staged record of `submitter` in `category`
    ///
    /// Fails only when the staged listing cannot be read. Per-record failures
    /// are reported in the returned [`CommitReport`].
    pub async fn commit(&self, submitter: &Submitter, category: Category) -> Result<CommitReport, IntakeError> {
        let staged = match self.staging.list_staged(submitter, category).await {
            Ok(staged) => staged,
            Err(IntakeError::RecordStore(e)) => {
                error!(submitter = %submitter, category = %category, error = %e, "Cannot read staged records");
                return Err(IntakeError::Infrastructure(e));
            }
            Err(e) => return Err(e),
        };

        let mut report = CommitReport::empty(submitter, category);
        report.total = staged.len();

        if staged.is_empty() {
            debug!(submitter = %submitter, category = %category, "Nothing staged to commit");
            return Ok(report);
        }

        info!(submitter = %submitter, category = %category, total = report.total, "Starting commit");

        for record in &staged {
            if self.cancelled() {
                warn!(
                    submitter = %submitter,
                    category = %category,
                    remaining = report.not_attempted(),
                    "Commit cancelled"
                );
                report.cancelled = true;
                break;
            }

            let outcome = self.commit_record(record).await;
            report.outcomes.push(outcome);
        }

        let (committed, total) = report.counts();
        info!(submitter = %submitter, category = %category, committed, total, "Commit finished");
        self.events.emit(IntakeEvent::CommitFinished {
            submitter: submitter.clone(),
            category,
            committed,
            total,
        });

        Ok(report)
    }

    async fn commit_record(&self, record: &StagedRecord) -> RecordOutcome {
        let category = record.category;
        let title = record.title().to_string();
        let bucket = self.settings.bucket_for(category);

        let mut outcome = RecordOutcome {
            staged_id: record.id,
            title: title.clone(),
            committed_id: None,
            attachment_refs: Vec::new(),
            dropped_attachments: Vec::new(),
            error: None,
            staged_copy_left: false,
        };

        for (index, attachment) in record.attachments.iter().enumerate() {
            let asset = match codec::decode(attachment) {
                Ok(asset) => asset,
                Err(e) => {
                    warn!(staged_id = %record.id, index, error = %e, "Dropping undecodable attachment");
                    outcome.dropped_attachments.push(DroppedAttachment {
                        index,
                        name: attachment.original_name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let path = paths::attachment_path(
                &record.submitter,
                category,
                &title,
                record.id,
                index,
                &asset.original_name,
                Utc::now(),
            );

            match object_store::with_timeout(
                self.settings.call_timeout,
                "attachment upload",
                self.objects
                    .put(bucket, &path, &asset.bytes, &asset.mime_type, PutMode::CreateNew),
            )
            .await
            {
                Ok(reference) => outcome.attachment_refs.push(reference),
                Err(e) => {
                    warn!(staged_id = %record.id, index, bucket, path = %path, error = %e, "Dropping attachment after failed upload");
                    outcome.dropped_attachments.push(DroppedAttachment {
                        index,
                        name: asset.original_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let inserted = with_timeout(
            self.settings.call_timeout,
            "committed insert",
            self.records.insert(
                category.committed_table(),
                NewRow {
                    submitter: record.submitter.clone(),
                    payload: committed_payload(&record.fields, &outcome.attachment_refs),
                },
            ),
        )
        .await;

        let committed_id = match inserted {
            Ok(id) => id,
            Err(e) => {
                error!(
                    submitter = %record.submitter,
                    category = %category,
                    staged_id = %record.id,
                    transient = e.is_transient(),
                    error = %e,
                    "Insert failed, record stays staged"
                );
                self.events.emit(IntakeEvent::CommitFailed {
                    submitter: record.submitter.clone(),
                    category,
                    staged_id: record.id,
                    error: e.to_string(),
                });
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.committed_id = Some(committed_id);

        if category == Category::Summary {
            self.point_to_latest_summary(record, committed_id, &outcome.attachment_refs).await;
        }

        match self.staging.delete_staged(&record.submitter, category, record.id).await {
            Ok(()) => {}
            Err(IntakeError::NotFound(_)) => {
                debug!(staged_id = %record.id, "Staged copy already gone");
            }
            Err(e) => {
                warn!(
                    submitter = %record.submitter,
                    category = %category,
                    staged_id = %record.id,
                    committed_id = %committed_id,
                    error = %e,
                    "Committed but staged copy remains"
                );
                outcome.staged_copy_left = true;
            }
        }

        debug!(
            staged_id = %record.id,
            committed_id = %committed_id,
            refs = outcome.attachment_refs.len(),
            dropped = outcome.dropped_attachments.len(),
            "Record committed"
        );
        self.events.emit(IntakeEvent::Committed {
            submitter: record.submitter.clone(),
            category,
            staged_id: record.id,
            committed_id,
            attachment_refs: outcome.attachment_refs.len(),
        });

        outcome
    }

    /// A committed summary document becomes the newest version, so the work
    /// summary must follow it
    async fn point_to_latest_summary(&self, record: &StagedRecord, committed_id: RecordId, refs: &[String]) {
        let Some(reference) = refs.first() else {
            warn!(staged_id = %record.id, committed_id = %committed_id, "Summary committed without a document");
            return;
        };

        match point_work_summary(
            self.records.as_ref(),
            self.settings.call_timeout,
            &record.submitter,
            Some(reference),
        )
        .await
        {
            Ok(0) => debug!(submitter = %record.submitter, "No work summary to point at new version"),
            Ok(_) => debug!(submitter = %record.submitter, committed_id = %committed_id, "Work summary points at new version"),
            Err(e) => warn!(
                submitter = %record.submitter,
                committed_id = %committed_id,
                error = %e,
                "Summary committed but work summary not updated"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::RecordDb;
    use crate::object_store::FsObjectStore;
    use crate::submission::{Asset, FieldMap, Submission, SubmissionLimits};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        staging: Arc<StagingManager>,
        coordinator: CommitCoordinator,
        db: Arc<RecordDb>,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(RecordDb::open_in_memory().unwrap());
        let objects = Arc::new(
            FsObjectStore::new(temp_dir.path(), "http://localhost:8090")
                .await
                .unwrap(),
        );
        let events = Arc::new(EventBus::new());
        let settings = ServiceSettings::from(&Config::default()).with_call_timeout(Duration::from_secs(5));
        let staging = Arc::new(StagingManager::new(db.clone(), events.clone(), settings.call_timeout));
        let coordinator = CommitCoordinator::new(staging.clone(), db.clone(), objects, events, settings);
        Fixture {
            _temp_dir: temp_dir,
            staging,
            coordinator,
            db,
        }
    }

    fn competition(name: &str, images: usize) -> Submission {
        let fields = FieldMap::from([
            ("competition_date".to_string(), "2025-09-12".to_string()),
            ("competition_name".to_string(), name.to_string()),
            ("description".to_string(), "Regional round".to_string()),
        ]);
        let assets = (0..images)
            .map(|i| Asset::new(format!("photo{}.png", i), "image/png", vec![7u8; 32]))
            .collect();
        Submission::new(Category::Competition, fields, assets, &SubmissionLimits::default()).unwrap()
    }

    #[tokio::test]
    async fn test_commit_with_images() {
        let f = fixture().await;
        let a = Submitter::new("Hospital A").unwrap();
        f.staging.stage(&a, competition("Skills", 2)).await.unwrap();

        let report = f.coordinator.commit(&a, Category::Competition).await.unwrap();
        assert_eq!(report.counts(), (1, 1));
        assert_eq!(report.outcomes[0].attachment_refs.len(), 2);
        assert!(report.outcomes[0].attachment_refs[0]
            .starts_with("http://localhost:8090/storage/v1/object/public/images/"));
        assert!(f.staging.list_staged(&a, Category::Competition).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_staging_is_noop() {
        let f = fixture().await;
        let a = Submitter::new("Hospital A").unwrap();
        let report = f.coordinator.commit(&a, Category::Award).await.unwrap();
        assert_eq!(report.counts(), (0, 0));
        assert_eq!(f.db.count(Category::Award.committed_table(), None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_leaves_everything_staged() {
        let f = fixture().await;
        let a = Submitter::new("Hospital A").unwrap();
        f.staging.stage(&a, competition("one", 0)).await.unwrap();
        f.staging.stage(&a, competition("two", 0)).await.unwrap();

        let (tx, rx) = watch::channel(true);
        let coordinator = f.coordinator.with_cancellation(rx);
        let report = coordinator.commit(&a, Category::Competition).await.unwrap();
        drop(tx);

        assert!(report.cancelled);
        assert_eq!(report.counts(), (0, 2));
        assert_eq!(report.not_attempted(), 2);
        assert_eq!(f.staging.list_staged(&a, Category::Competition).await.unwrap().len(), 2);
    }
}
