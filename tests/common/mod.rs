//! Shared fixtures: gateways with switchable failures

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use intake_store::error::{ObjectStoreError, RecordStoreError};
use intake_store::object_store::{FsObjectStore, ObjectStore, PutMode};
use intake_store::record_store::{NewRow, RecordId, RecordStore, Row, RowFilter, RowMatch};
use intake_store::services::ServiceSettings;
use intake_store::{Asset, Category, Config, FieldMap, RecordDb, Services, Submission, SubmissionLimits};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::watch;

fn is_pending(table: &str) -> bool {
    table.starts_with("pending_")
}

/// Record store wrapper that fails on demand
pub struct FaultyRecords {
    pub inner: RecordDb,
    /// Permanent inserts whose payload contains this text are rejected
    pub reject_insert_containing: Mutex<Option<String>>,
    pub fail_staged_delete: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_query: AtomicBool,
    /// Delay applied before every staged-table query
    pub staged_query_delay: Mutex<Option<Duration>>,
    /// Fires `true` once this many permanent inserts succeeded
    pub cancel_after_inserts: Mutex<Option<(usize, watch::Sender<bool>)>>,
    pub permanent_inserts: AtomicUsize,
}

impl FaultyRecords {
    pub fn new() -> Self {
        Self {
            inner: RecordDb::open_in_memory().unwrap(),
            reject_insert_containing: Mutex::new(None),
            fail_staged_delete: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            staged_query_delay: Mutex::new(None),
            cancel_after_inserts: Mutex::new(None),
            permanent_inserts: AtomicUsize::new(0),
        }
    }

    pub fn reject_inserts_containing(&self, marker: &str) {
        *self.reject_insert_containing.lock().unwrap() = Some(marker.to_string());
    }
}

#[async_trait]
impl RecordStore for FaultyRecords {
    async fn insert(&self, table: &str, row: NewRow) -> Result<RecordId, RecordStoreError> {
        if !is_pending(table) {
            let marker = self.reject_insert_containing.lock().unwrap().clone();
            if let Some(marker) = marker {
                if row.payload.to_string().contains(&marker) {
                    return Err(RecordStoreError::Constraint {
                        table: table.to_string(),
                        reason: format!("rejected row containing {}", marker),
                    });
                }
            }
        }

        let id = self.inner.insert(table, row).await?;

        if !is_pending(table) {
            let done = self.permanent_inserts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, sender)) = self.cancel_after_inserts.lock().unwrap().as_ref() {
                if done >= *after {
                    let _ = sender.send(true);
                }
            }
        }
        Ok(id)
    }

    async fn update(&self, table: &str, matcher: &RowMatch, patch: Value) -> Result<u64, RecordStoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("update refused".to_string()));
        }
        self.inner.update(table, matcher, patch).await
    }

    async fn query(&self, table: &str, filter: &RowFilter) -> Result<Vec<Row>, RecordStoreError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("record store offline".to_string()));
        }
        if is_pending(table) {
            let delay = *self.staged_query_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.inner.query(table, filter).await
    }

    async fn delete(&self, table: &str, id: RecordId) -> Result<(), RecordStoreError> {
        if is_pending(table) && self.fail_staged_delete.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("staged delete refused".to_string()));
        }
        self.inner.delete(table, id).await
    }
}

/// Object store wrapper that fails on demand
pub struct FaultyObjects {
    pub inner: FsObjectStore,
    pub fail_put: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Delay applied before every put
    pub put_delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl ObjectStore for FaultyObjects {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        mode: PutMode,
    ) -> Result<String, ObjectStoreError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Upload {
                bucket: bucket.to_string(),
                path: path.to_string(),
                reason: "bucket unavailable".to_string(),
            });
        }
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.put(bucket, path, bytes, content_type, mode).await
    }

    fn public_reference(&self, bucket: &str, path: &str) -> String {
        self.inner.public_reference(bucket, path)
    }

    async fn delete(&self, bucket: &str, path_or_reference: &str) -> Result<(), ObjectStoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Delete {
                bucket: bucket.to_string(),
                path: path_or_reference.to_string(),
                reason: "bucket unavailable".to_string(),
            });
        }
        self.inner.delete(bucket, path_or_reference).await
    }
}

pub struct Harness {
    pub _temp_dir: TempDir,
    pub records: Arc<FaultyRecords>,
    pub objects: Arc<FaultyObjects>,
    pub services: Services,
}

pub async fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(5)).await
}

pub async fn harness_with_timeout(call_timeout: Duration) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let records = Arc::new(FaultyRecords::new());
    let objects = Arc::new(FaultyObjects {
        inner: FsObjectStore::new(temp_dir.path().join("objects"), "http://localhost:8090")
            .await
            .unwrap(),
        fail_put: AtomicBool::new(false),
        fail_delete: AtomicBool::new(false),
        put_delay: Mutex::new(None),
    });
    let settings = ServiceSettings::from(&Config::default()).with_call_timeout(call_timeout);
    let services = Services::new(records.clone(), objects.clone(), settings);

    Harness {
        _temp_dir: temp_dir,
        records,
        objects,
        services,
    }
}

pub fn academic(name: &str, images: usize) -> Submission {
    let fields = FieldMap::from([
        ("activity_date".to_string(), "2025-03-18".to_string()),
        ("activity_name".to_string(), name.to_string()),
        ("description".to_string(), "Ward teaching session".to_string()),
    ]);
    let assets = (0..images)
        .map(|i| Asset::new(format!("scene{}.jpg", i), "image/jpeg", vec![0xFF, 0xD8, i as u8]))
        .collect();
    Submission::new(Category::Academic, fields, assets, &SubmissionLimits::default()).unwrap()
}
