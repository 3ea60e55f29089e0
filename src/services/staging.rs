//! Staging manager - the per-submitter pending area
//!
//! Items composed in the intake form are written here before commit, so a
//! client reload or disconnect loses nothing. Each category has its own
//! pending table; rows are scoped by submitter on every call.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::codec;
use crate::error::{IntakeError, RecordStoreError};
use crate::record_store::{with_timeout, NewRow, RecordId, RecordStore, Row, RowFilter};
use crate::submission::{EncodedAttachment, FieldMap, StagedRecord, Submission, Submitter};

use super::events::{EventBus, IntakeEvent};

/// Payload stored in a pending row
#[derive(Debug, Deserialize)]
struct StagedPayload {
    fields: FieldMap,
    #[serde(default)]
    attachments: Vec<EncodedAttachment>,
}

fn staged_from_row(category: Category, row: Row) -> Result<StagedRecord, RecordStoreError> {
    let payload: StagedPayload =
        serde_json::from_value(row.payload).map_err(|e| RecordStoreError::Malformed {
            table: category.pending_table().to_string(),
            reason: format!("row {}: {}", row.id, e),
        })?;

    Ok(StagedRecord {
        id: row.id,
        submitter: row.submitter,
        category,
        fields: payload.fields,
        attachments: payload.attachments,
        staged_at: row.created_at,
    })
}

/// Staging manager
pub struct StagingManager {
    records: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    call_timeout: Duration,
}

impl StagingManager {
    pub fn new(records: Arc<dyn RecordStore>, events: Arc<EventBus>, call_timeout: Duration) -> Self {
        Self {
            records,
            events,
            call_timeout,
        }
    }

    /// Stage a validated submission; returns the pending row id
    pub async fn stage(&self, submitter: &Submitter, submission: Submission) -> Result<RecordId, IntakeError> {
        let (category, fields, assets) = submission.into_parts();
        let attachments: Vec<EncodedAttachment> = assets.iter().map(codec::encode).collect();
        let attachment_count = attachments.len();

        let payload = staged_payload(&fields, &attachments);

        let id = with_timeout(
            self.call_timeout,
            "stage insert",
            self.records.insert(
                category.pending_table(),
                NewRow {
                    submitter: submitter.clone(),
                    payload,
                },
            ),
        )
        .await?;

        info!(
            submitter = %submitter,
            category = %category,
            staged_id = %id,
            attachments = attachment_count,
            "Staged record"
        );

        self.events.emit(IntakeEvent::Staged {
            submitter: submitter.clone(),
            category,
            id,
            attachments: attachment_count,
        });

        Ok(id)
    }

    /// Staged records for a submitter, oldest first
    ///
    /// Rows whose payload no longer parses are skipped with a warning.
    pub async fn list_staged(
        &self,
        submitter: &Submitter,
        category: Category,
    ) -> Result<Vec<StagedRecord>, IntakeError> {
        let rows = with_timeout(
            self.call_timeout,
            "staged query",
            self.records.query(category.pending_table(), &RowFilter::submitter(submitter)),
        )
        .await?;

        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            match staged_from_row(category, row) {
                Ok(record) => staged.push(record),
                Err(e) => warn!(submitter = %submitter, category = %category, error = %e, "Skipping unreadable staged row"),
            }
        }

        debug!(submitter = %submitter, category = %category, count = staged.len(), "Listed staged records");
        Ok(staged)
    }

    /// Delete one staged record belonging to the submitter
    pub async fn delete_staged(
        &self,
        submitter: &Submitter,
        category: Category,
        id: RecordId,
    ) -> Result<(), IntakeError> {
        let table = category.pending_table();
        let existing = with_timeout(
            self.call_timeout,
            "staged lookup",
            self.records.query(table, &RowFilter::submitter(submitter).with_id(id)),
        )
        .await?;

        if existing.is_empty() {
            return Err(IntakeError::NotFound(format!(
                "staged {} record {} for {}",
                category, id, submitter
            )));
        }

        with_timeout(self.call_timeout, "staged delete", self.records.delete(table, id)).await?;

        debug!(submitter = %submitter, category = %category, staged_id = %id, "Deleted staged record");
        self.events.emit(IntakeEvent::StagedDeleted {
            submitter: submitter.clone(),
            category,
            id,
        });

        Ok(())
    }

    /// Discard every staged record of the submitter in a category
    ///
    /// Returns how many rows were removed; a second call removes nothing.
    pub async fn clear_staged(&self, submitter: &Submitter, category: Category) -> Result<usize, IntakeError> {
        let table = category.pending_table();
        let rows = with_timeout(
            self.call_timeout,
            "staged query",
            self.records.query(table, &RowFilter::submitter(submitter)),
        )
        .await?;

        for row in &rows {
            with_timeout(self.call_timeout, "staged delete", self.records.delete(table, row.id)).await?;
        }

        if !rows.is_empty() {
            info!(submitter = %submitter, category = %category, removed = rows.len(), "Cleared staged records");
            self.events.emit(IntakeEvent::StagingCleared {
                submitter: submitter.clone(),
                category,
                removed: rows.len(),
            });
        }

        Ok(rows.len())
    }
}

/// JSON payload of a pending row
pub fn staged_payload(fields: &FieldMap, attachments: &[EncodedAttachment]) -> Value {
    serde_json::json!({ "fields": fields, "attachments": attachments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordDb;
    use crate::submission::{Asset, SubmissionLimits};

    fn manager() -> StagingManager {
        StagingManager::new(
            Arc::new(RecordDb::open_in_memory().unwrap()),
            Arc::new(EventBus::new()),
            Duration::from_secs(5),
        )
    }

    fn award(name: &str, images: usize) -> Submission {
        let fields = FieldMap::from([
            ("award_date".to_string(), "2025-06-01".to_string()),
            ("award_name".to_string(), name.to_string()),
            ("award_organization".to_string(), "City Health Bureau".to_string()),
        ]);
        let assets = (0..images)
            .map(|i| Asset::new(format!("{}.jpg", i), "image/jpeg", vec![i as u8; 16]))
            .collect();
        Submission::new(Category::Award, fields, assets, &SubmissionLimits::default()).unwrap()
    }

    #[tokio::test]
    async fn test_stage_then_list_roundtrip() {
        let staging = manager();
        let submitter = Submitter::new("Hospital A").unwrap();
        let submission = award("Best practice", 2);
        let expected_fields = submission.fields().clone();

        let id = staging.stage(&submitter, submission).await.unwrap();
        let staged = staging.list_staged(&submitter, Category::Award).await.unwrap();

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, id);
        assert_eq!(staged[0].fields, expected_fields);
        assert_eq!(staged[0].attachments.len(), 2);
        assert_eq!(codec::decode(&staged[0].attachments[1]).unwrap().bytes, vec![1u8; 16]);
        assert_eq!(staged[0].title(), "Best practice");
    }

    #[tokio::test]
    async fn test_listing_is_scoped_and_stable() {
        let staging = manager();
        let a = Submitter::new("Hospital A").unwrap();
        let b = Submitter::new("Hospital B").unwrap();

        let first = staging.stage(&a, award("one", 0)).await.unwrap();
        staging.stage(&b, award("other", 0)).await.unwrap();
        let second = staging.stage(&a, award("two", 1)).await.unwrap();

        let listed: Vec<RecordId> = staging
            .list_staged(&a, Category::Award)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(listed, vec![first, second]);

        let again: Vec<RecordId> = staging
            .list_staged(&a, Category::Award)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(listed, again);
        assert!(staging.list_staged(&a, Category::Academic).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_staged() {
        let staging = manager();
        let a = Submitter::new("Hospital A").unwrap();
        let b = Submitter::new("Hospital B").unwrap();
        let id = staging.stage(&a, award("one", 0)).await.unwrap();

        // Another submitter cannot delete it
        let err = staging.delete_staged(&b, Category::Award, id).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));

        staging.delete_staged(&a, Category::Award, id).await.unwrap();
        let err = staging.delete_staged(&a, Category::Award, id).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_clear_staged_twice() {
        let staging = manager();
        let a = Submitter::new("Hospital A").unwrap();
        staging.stage(&a, award("one", 1)).await.unwrap();
        staging.stage(&a, award("two", 0)).await.unwrap();

        assert_eq!(staging.clear_staged(&a, Category::Award).await.unwrap(), 2);
        assert_eq!(staging.clear_staged(&a, Category::Award).await.unwrap(), 0);
        assert!(staging.list_staged(&a, Category::Award).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_row_is_skipped() {
        let db = Arc::new(RecordDb::open_in_memory().unwrap());
        let staging = StagingManager::new(db.clone(), Arc::new(EventBus::new()), Duration::from_secs(5));
        let a = Submitter::new("Hospital A").unwrap();

        db.insert(
            Category::Award.pending_table(),
            NewRow {
                submitter: a.clone(),
                payload: serde_json::json!({"fields": "not a map"}),
            },
        )
        .await
        .unwrap();
        let id = staging.stage(&a, award("one", 0)).await.unwrap();

        let staged = staging.list_staged(&a, Category::Award).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].id, id);
    }
}
