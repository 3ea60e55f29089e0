//! Summary document service
//!
//! Each upload of an annual summary is kept as its own version under a
//! timestamped path, and the submitter's `work_summary` row is pointed at the
//! newest one together with the contact details given at upload time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::db::schema::WORK_SUMMARY_TABLE;
use crate::error::{IntakeError, ObjectStoreError, RecordStoreError, ValidationError};
use crate::object_store::{self, ObjectStore, PutMode};
use crate::paths;
use crate::record_store::{with_timeout, NewRow, RecordId, RecordStore, RowFilter, RowMatch};
use crate::submission::{Asset, CommittedRecord, ContactInfo, FieldMap, Submission, Submitter};

use super::events::{EventBus, IntakeEvent};
use super::records::{committed_from_row, committed_payload};
use super::ServiceSettings;

const FILENAME_FIELD: &str = "original_filename";
const MAX_PUT_ATTEMPTS: u32 = 5;

/// One stored version of a summary document
#[derive(Debug, Clone, Serialize)]
pub struct SummaryDocument {
    pub id: RecordId,
    pub submitter: Submitter,
    pub original_filename: String,
    pub reference: String,
    pub uploaded_at: DateTime<Utc>,
}

impl SummaryDocument {
    fn from_record(record: CommittedRecord) -> Option<Self> {
        let reference = record.attachment_refs.into_iter().next()?;
        Some(Self {
            id: record.id,
            original_filename: record.fields.get(FILENAME_FIELD).cloned().unwrap_or_default(),
            submitter: record.submitter,
            reference,
            uploaded_at: record.created_at,
        })
    }
}

/// Contact details and latest summary reference of a submitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSummary {
    pub contact_person: String,
    pub contact_phone: String,
    pub summary_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Summary document service
pub struct DocumentService {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    events: Arc<EventBus>,
    settings: ServiceSettings,
}

impl DocumentService {
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

    fn validate(&self, asset: Asset) -> Result<Asset, IntakeError> {
        let fields = FieldMap::from([(FILENAME_FIELD.to_string(), asset.original_name.clone())]);
        let submission = Submission::new(Category::Summary, fields, vec![asset], &self.settings.limits)?;
        let (_, _, mut assets) = submission.into_parts();
        assets
            .pop()
            .ok_or_else(|| ValidationError::MissingField("document".to_string()).into())
    }

    /// Store a new version; earlier versions are never overwritten
    pub async fn upload_version(
        &self,
        submitter: &Submitter,
        contact: &ContactInfo,
        asset: Asset,
    ) -> Result<SummaryDocument, IntakeError> {
        let asset = self.validate(asset)?;
        let reference = self.put_new_version(submitter, &asset).await?;

        let fields = FieldMap::from([(FILENAME_FIELD.to_string(), asset.original_name.clone())]);
        let id = with_timeout(
            self.settings.call_timeout,
            "document insert",
            self.records.insert(
                Category::Summary.committed_table(),
                NewRow {
                    submitter: submitter.clone(),
                    payload: committed_payload(&fields, std::slice::from_ref(&reference)),
                },
            ),
        )
        .await?;

        // The version row is the source of truth; a stale pointer is repaired
        // by the next upload or version delete
        if let Err(e) = self.upsert_work_summary(submitter, contact, Some(&reference)).await {
            warn!(submitter = %submitter, id = %id, error = %e, "Version stored but work summary not updated");
        }

        info!(
            submitter = %submitter,
            id = %id,
            filename = %asset.original_name,
            size = asset.bytes.len(),
            "Uploaded summary document version"
        );
        self.events.emit(IntakeEvent::DocumentUploaded {
            submitter: submitter.clone(),
            id,
            reference: reference.clone(),
        });

        Ok(SummaryDocument {
            id,
            submitter: submitter.clone(),
            original_filename: asset.original_name,
            reference,
            uploaded_at: Utc::now(),
        })
    }

    /// Upload under a fresh timestamped path, retrying when two uploads land
    /// in the same millisecond
    async fn put_new_version(&self, submitter: &Submitter, asset: &Asset) -> Result<String, IntakeError> {
        let bucket = &self.settings.documents_bucket;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let path = paths::document_path(submitter, &asset.original_name, Utc::now());
            let result = object_store::with_timeout(
                self.settings.call_timeout,
                "document upload",
                self.objects
                    .put(bucket, &path, &asset.bytes, &asset.mime_type, PutMode::CreateNew),
            )
            .await;

            match result {
                Err(ObjectStoreError::AlreadyExists { .. }) if attempt < MAX_PUT_ATTEMPTS => {
                    debug!(path = %path, attempt, "Version path taken, retrying");
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                other => return Ok(other?),
            }
        }
    }

    /// Legacy single-version mode: overwrite the submitter's one document
    ///
    /// No version row is written; only the work summary is updated.
    pub async fn replace_single(
        &self,
        submitter: &Submitter,
        contact: &ContactInfo,
        asset: Asset,
    ) -> Result<String, IntakeError> {
        let asset = self.validate(asset)?;
        let path = paths::single_document_path(submitter, &asset.original_name);

        let reference = object_store::with_timeout(
            self.settings.call_timeout,
            "document upload",
            self.objects.put(
                &self.settings.documents_bucket,
                &path,
                &asset.bytes,
                &asset.mime_type,
                PutMode::Overwrite,
            ),
        )
        .await?;

        self.upsert_work_summary(submitter, contact, Some(&reference)).await?;
        info!(submitter = %submitter, path = %path, "Replaced single summary document");

        Ok(reference)
    }

    /// All versions, newest first
    pub async fn list_versions(&self, submitter: &Submitter) -> Result<Vec<SummaryDocument>, IntakeError> {
        self.versions(RowFilter::submitter(submitter).newest_first()).await
    }

    pub async fn current_version(&self, submitter: &Submitter) -> Result<Option<SummaryDocument>, IntakeError> {
        let mut filter = RowFilter::submitter(submitter).newest_first();
        filter.limit = Some(1);
        Ok(self.versions(filter).await?.into_iter().next())
    }

    async fn versions(&self, filter: RowFilter) -> Result<Vec<SummaryDocument>, IntakeError> {
        let table = Category::Summary.committed_table();
        let rows = with_timeout(self.settings.call_timeout, "document query", self.records.query(table, &filter)).await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match committed_from_row(Category::Summary, row).map(SummaryDocument::from_record) {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => warn!(id = %id, "Summary version has no document reference"),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable summary version"),
            }
        }
        Ok(documents)
    }

    /// Delete one version and, best-effort, its stored document
    ///
    /// When the deleted version was the one the work summary points at, the
    /// pointer moves to the newest remaining version.
    pub async fn delete_version(&self, submitter: &Submitter, id: RecordId) -> Result<(), IntakeError> {
        let table = Category::Summary.committed_table();
        let doc = self
            .versions(RowFilter::submitter(submitter).with_id(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IntakeError::NotFound(format!("summary version {} for {}", id, submitter)))?;

        with_timeout(self.settings.call_timeout, "document delete", self.records.delete(table, id)).await?;
        self.events.emit(IntakeEvent::CommittedDeleted {
            category: Category::Summary,
            id,
        });

        if let Err(e) = object_store::with_timeout(
            self.settings.call_timeout,
            "object delete",
            self.objects.delete(&self.settings.documents_bucket, &doc.reference),
        )
        .await
        {
            warn!(reference = %doc.reference, error = %e, "Summary document left orphaned");
        }

        if let Some(summary) = self.work_summary(submitter).await? {
            if summary.summary_url.as_deref() == Some(doc.reference.as_str()) {
                let latest = self.current_version(submitter).await?.map(|d| d.reference);
                point_work_summary(
                    self.records.as_ref(),
                    self.settings.call_timeout,
                    submitter,
                    latest.as_deref(),
                )
                .await?;
            }
        }

        info!(submitter = %submitter, id = %id, "Deleted summary document version");
        Ok(())
    }

    /// Contact details and latest summary reference
    pub async fn work_summary(&self, submitter: &Submitter) -> Result<Option<WorkSummary>, IntakeError> {
        let rows = with_timeout(
            self.settings.call_timeout,
            "work summary query",
            self.records.query(WORK_SUMMARY_TABLE, &RowFilter::submitter(submitter)),
        )
        .await?;

        match rows.into_iter().next() {
            Some(row) => {
                let summary: WorkSummary =
                    serde_json::from_value(row.payload).map_err(|e| RecordStoreError::Malformed {
                        table: WORK_SUMMARY_TABLE.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(summary))
            }
            None => Ok(None),
        }
    }

    async fn upsert_work_summary(
        &self,
        submitter: &Submitter,
        contact: &ContactInfo,
        summary_url: Option<&str>,
    ) -> Result<(), IntakeError> {
        let payload = json!({
            "contact_person": contact.person,
            "contact_phone": contact.phone,
            "summary_url": summary_url,
            "updated_at": Utc::now(),
        });

        let updated = with_timeout(
            self.settings.call_timeout,
            "work summary update",
            self.records.update(
                WORK_SUMMARY_TABLE,
                &RowMatch::Submitter(submitter.clone()),
                payload.clone(),
            ),
        )
        .await?;

        if updated > 0 {
            debug!(submitter = %submitter, "Updated work summary");
            return Ok(());
        }

        let inserted = with_timeout(
            self.settings.call_timeout,
            "work summary insert",
            self.records.insert(
                WORK_SUMMARY_TABLE,
                NewRow {
                    submitter: submitter.clone(),
                    payload: payload.clone(),
                },
            ),
        )
        .await;

        match inserted {
            Ok(_) => {
                debug!(submitter = %submitter, "Created work summary");
                Ok(())
            }
            // Lost a race with another upload; the row exists now
            Err(RecordStoreError::Constraint { .. }) => {
                with_timeout(
                    self.settings.call_timeout,
                    "work summary update",
                    self.records.update(WORK_SUMMARY_TABLE, &RowMatch::Submitter(submitter.clone()), payload),
                )
                .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Point an existing work summary at `summary_url`; returns rows changed
///
/// Contact details are left alone, and no row is created when the submitter
/// has none yet.
pub(crate) async fn point_work_summary(
    records: &dyn RecordStore,
    call_timeout: Duration,
    submitter: &Submitter,
    summary_url: Option<&str>,
) -> Result<u64, RecordStoreError> {
    with_timeout(
        call_timeout,
        "work summary update",
        records.update(
            WORK_SUMMARY_TABLE,
            &RowMatch::Submitter(submitter.clone()),
            json!({ "summary_url": summary_url, "updated_at": Utc::now() }),
        ),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::RecordDb;
    use crate::object_store::FsObjectStore;
    use tempfile::TempDir;

    const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    async fn service(temp_dir: &TempDir) -> (DocumentService, Arc<FsObjectStore>) {
        let db = Arc::new(RecordDb::open_in_memory().unwrap());
        let objects = Arc::new(
            FsObjectStore::new(temp_dir.path(), "http://localhost:8090")
                .await
                .unwrap(),
        );
        let service = DocumentService::new(
            db,
            objects.clone(),
            Arc::new(EventBus::new()),
            ServiceSettings::from(&Config::default()),
        );
        (service, objects)
    }

    fn contact() -> ContactInfo {
        ContactInfo::new("Li Wei", "138-0013-8000").unwrap()
    }

    #[tokio::test]
    async fn test_versions_accumulate() {
        let temp_dir = TempDir::new().unwrap();
        let (service, objects) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        let first = service
            .upload_version(&a, &contact(), Asset::new("plan.docx", DOCX, b"v1".to_vec()))
            .await
            .unwrap();
        let second = service
            .upload_version(&a, &contact(), Asset::new("plan.docx", DOCX, b"v2".to_vec()))
            .await
            .unwrap();
        assert_ne!(first.reference, second.reference);

        let versions = service.list_versions(&a).await.unwrap();
        assert_eq!(versions.iter().map(|v| v.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert_eq!(objects.get("documents", &first.reference).await.unwrap(), b"v1");

        let current = service.current_version(&a).await.unwrap().unwrap();
        assert_eq!(current.id, second.id);

        let summary = service.work_summary(&a).await.unwrap().unwrap();
        assert_eq!(summary.contact_phone, "13800138000");
        assert_eq!(summary.summary_url.as_deref(), Some(second.reference.as_str()));
    }

    #[tokio::test]
    async fn test_delete_current_version_moves_pointer() {
        let temp_dir = TempDir::new().unwrap();
        let (service, objects) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        let first = service
            .upload_version(&a, &contact(), Asset::new("plan.docx", DOCX, b"v1".to_vec()))
            .await
            .unwrap();
        let second = service
            .upload_version(&a, &contact(), Asset::new("plan.docx", DOCX, b"v2".to_vec()))
            .await
            .unwrap();

        service.delete_version(&a, second.id).await.unwrap();
        assert!(!objects.exists("documents", &second.reference).await);

        let summary = service.work_summary(&a).await.unwrap().unwrap();
        assert_eq!(summary.summary_url.as_deref(), Some(first.reference.as_str()));

        let other = Submitter::new("Hospital B").unwrap();
        let err = service.delete_version(&other, first.id).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replace_single_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let (service, objects) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        let first = service
            .replace_single(&a, &contact(), Asset::new("plan.docx", DOCX, b"old".to_vec()))
            .await
            .unwrap();
        let second = service
            .replace_single(&a, &contact(), Asset::new("plan.docx", DOCX, b"new".to_vec()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(objects.get("documents", &second).await.unwrap(), b"new");
        assert!(service.list_versions(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_document() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir).await;
        let a = Submitter::new("Hospital A").unwrap();

        let err = service
            .upload_version(&a, &contact(), Asset::new("photo.jpg", "image/jpeg", vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
    }
}
