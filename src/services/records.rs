//! Committed record service
//!
//! Read and delete paths over the permanent tables. Deleting a record never
//! fails because its stored assets could not be removed; orphaned objects are
//! logged and left behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::error::{IntakeError, RecordStoreError};
use crate::object_store::{self, ObjectStore};
use crate::record_store::{with_timeout, RecordId, RecordStore, Row, RowFilter};
use crate::submission::{CommittedRecord, FieldMap, Submitter};

use super::events::{EventBus, IntakeEvent};
use super::ServiceSettings;

#[derive(Debug, Deserialize)]
struct CommittedPayload {
    fields: FieldMap,
    #[serde(default)]
    attachment_refs: Vec<String>,
}

/// JSON payload of a permanent row
pub fn committed_payload(fields: &FieldMap, attachment_refs: &[String]) -> Value {
    serde_json::json!({ "fields": fields, "attachment_refs": attachment_refs })
}

pub(crate) fn committed_from_row(category: Category, row: Row) -> Result<CommittedRecord, RecordStoreError> {
    let payload: CommittedPayload =
        serde_json::from_value(row.payload).map_err(|e| RecordStoreError::Malformed {
            table: category.committed_table().to_string(),
            reason: format!("row {}: {}", row.id, e),
        })?;

    Ok(CommittedRecord {
        id: row.id,
        submitter: row.submitter,
        category,
        fields: payload.fields,
        attachment_refs: payload.attachment_refs,
        created_at: row.created_at,
    })
}

/// Result of deleting a committed record
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub id: RecordId,
    pub assets_removed: usize,
    /// References whose object could not be deleted
    pub orphaned_assets: Vec<String>,
}

/// Per-category counts for one submitter
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOverview {
    pub submitter: Submitter,
    pub committed: Vec<CategoryCount>,
    pub staged: Vec<CategoryCount>,
    pub summary_versions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

impl SubmissionOverview {
    pub fn committed_total(&self) -> usize {
        self.committed.iter().map(|c| c.count).sum()
    }

    pub fn committed_in(&self, category: Category) -> usize {
        self.committed
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// Committed record service
pub struct RecordService {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    events: Arc<EventBus>,
    settings: ServiceSettings,
}

impl RecordService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        events: Arc<EventBus>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            records,
            objects,
            events,
            settings,
        }
    }

    async fn load(&self, category: Category, filter: RowFilter) -> Result<Vec<CommittedRecord>, IntakeError> {
        let rows = with_timeout(
            self.settings.call_timeout,
            "committed query",
            self.records.query(category.committed_table(), &filter),
        )
        .await?;

        let mut committed = Vec::with_capacity(rows.len());
        for row in rows {
            match committed_from_row(category, row) {
                Ok(record) => committed.push(record),
                Err(e) => warn!(category = %category, error = %e, "Skipping unreadable committed row"),
            }
        }
        Ok(committed)
    }

    /// Committed records of one submitter, in creation order
    pub async fn list(&self, submitter: &Submitter, category: Category) -> Result<Vec<CommittedRecord>, IntakeError> {
        self.load(category, RowFilter::submitter(submitter)).await
    }

    /// Committed records of every submitter in a category
    pub async fn list_all(&self, category: Category) -> Result<Vec<CommittedRecord>, IntakeError> {
        self.load(category, RowFilter::default()).await
    }

    pub async fn get(&self, category: Category, id: RecordId) -> Result<CommittedRecord, IntakeError> {
        self.load(category, RowFilter::default().with_id(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IntakeError::NotFound(format!("{} record {}", category, id)))
    }

    /// Delete a committed record, then its stored assets on a best-effort basis
    pub async fn delete_committed(&self, category: Category, id: RecordId) -> Result<DeleteOutcome, IntakeError> {
        let record = self.get(category, id).await?;

        with_timeout(
            self.settings.call_timeout,
            "committed delete",
            self.records.delete(category.committed_table(), id),
        )
        .await?;

        info!(category = %category, id = %id, submitter = %record.submitter, "Deleted committed record");
        self.events.emit(IntakeEvent::CommittedDeleted { category, id });

        let bucket = self.settings.bucket_for(category);
        let mut outcome = DeleteOutcome {
            id,
            assets_removed: 0,
            orphaned_assets: Vec::new(),
        };

        for reference in record.attachment_refs {
            match object_store::with_timeout(
                self.settings.call_timeout,
                "object delete",
                self.objects.delete(bucket, &reference),
            )
            .await
            {
                Ok(()) => outcome.assets_removed += 1,
                Err(e) => {
                    warn!(bucket, reference = %reference, error = %e, "Asset left orphaned");
                    outcome.orphaned_assets.push(reference);
                }
            }
        }

        Ok(outcome)
    }

    /// Counts of committed and staged records per category
    pub async fn overview(&self, submitter: &Submitter) -> Result<SubmissionOverview, IntakeError> {
        let filter = RowFilter::submitter(submitter);
        let mut committed = Vec::new();
        let mut staged = Vec::new();
        let mut summary_versions = 0;

        for category in Category::ALL {
            let committed_rows = with_timeout(
                self.settings.call_timeout,
                "overview query",
                self.records.query(category.committed_table(), &filter),
            )
            .await?;
            let staged_rows = with_timeout(
                self.settings.call_timeout,
                "overview query",
                self.records.query(category.pending_table(), &filter),
            )
            .await?;

            if category == Category::Summary {
                summary_versions = committed_rows.len();
                continue;
            }

            committed.push(CategoryCount {
                category,
                count: committed_rows.len(),
            });
            staged.push(CategoryCount {
                category,
                count: staged_rows.len(),
            });
        }

        debug!(submitter = %submitter, summary_versions, "Built submission overview");

        Ok(SubmissionOverview {
            submitter: submitter.clone(),
            committed,
            staged,
            summary_versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::RecordDb;
    use crate::object_store::{FsObjectStore, PutMode};
    use crate::record_store::NewRow;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn service(temp_dir: &TempDir) -> (RecordService, Arc<RecordDb>, Arc<FsObjectStore>) {
        let db = Arc::new(RecordDb::open_in_memory().unwrap());
        let objects = Arc::new(
            FsObjectStore::new(temp_dir.path(), "http://localhost:8090")
                .await
                .unwrap(),
        );
        let settings = ServiceSettings::from(&Config::default()).with_call_timeout(Duration::from_secs(5));
        let service = RecordService::new(db.clone(), objects.clone(), Arc::new(EventBus::new()), settings);
        (service, db, objects)
    }

    async fn insert_committed(db: &RecordDb, submitter: &Submitter, name: &str, refs: &[String]) -> RecordId {
        let fields = FieldMap::from([("award_name".to_string(), name.to_string())]);
        db.insert(
            Category::Award.committed_table(),
            NewRow {
                submitter: submitter.clone(),
                payload: committed_payload(&fields, refs),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let temp_dir = TempDir::new().unwrap();
        let (service, db, _) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();
        let b = Submitter::new("Hospital B").unwrap();

        let first = insert_committed(&db, &a, "first", &[]).await;
        insert_committed(&db, &b, "other", &[]).await;
        let second = insert_committed(&db, &a, "second", &[]).await;

        let listed = service.list(&a, Category::Award).await.unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(service.list_all(Category::Award).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_assets() {
        let temp_dir = TempDir::new().unwrap();
        let (service, db, objects) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        let reference = objects
            .put("images", "a/award/x-1/award_0.jpg", b"jpeg", "image/jpeg", PutMode::CreateNew)
            .await
            .unwrap();
        let id = insert_committed(&db, &a, "x", &[reference.clone()]).await;

        let outcome = service.delete_committed(Category::Award, id).await.unwrap();
        assert_eq!(outcome.assets_removed, 1);
        assert!(outcome.orphaned_assets.is_empty());
        assert!(!objects.exists("images", &reference).await);
        assert!(service.list(&a, Category::Award).await.unwrap().is_empty());

        let err = service.delete_committed(Category::Award, id).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_overview_counts() {
        let temp_dir = TempDir::new().unwrap();
        let (service, db, _) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        insert_committed(&db, &a, "one", &[]).await;
        insert_committed(&db, &a, "two", &[]).await;
        db.insert(
            Category::Summary.committed_table(),
            NewRow {
                submitter: a.clone(),
                payload: committed_payload(&FieldMap::new(), &[]),
            },
        )
        .await
        .unwrap();

        let overview = service.overview(&a).await.unwrap();
        assert_eq!(overview.committed_in(Category::Award), 2);
        assert_eq!(overview.committed_total(), 2);
        assert_eq!(overview.summary_versions, 1);
    }
}
