//! Record store gateway
//!
//! Table-oriented access to structured rows. Every row belongs to one
//! submitter and carries a JSON payload; ids are assigned by the store and
//! are unique per table only.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordStoreError;
use crate::submission::Submitter;

/// Store-assigned row id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row to insert
#[derive(Debug, Clone)]
pub struct NewRow {
    pub submitter: Submitter,
    pub payload: Value,
}

/// Stored row
#[derive(Debug, Clone)]
pub struct Row {
    pub id: RecordId,
    pub submitter: Submitter,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Which rows an update applies to
#[derive(Debug, Clone)]
pub enum RowMatch {
    Id(RecordId),
    Submitter(Submitter),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowOrder {
    /// Creation order
    #[default]
    Oldest,
    Newest,
}

/// Query filter; an empty filter selects the whole table
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub submitter: Option<Submitter>,
    pub id: Option<RecordId>,
    pub order: RowOrder,
    pub limit: Option<u32>,
}

impl RowFilter {
    pub fn submitter(submitter: &Submitter) -> Self {
        Self {
            submitter: Some(submitter.clone()),
            ..Default::default()
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.order = RowOrder::Newest;
        self
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row and return its id
    async fn insert(&self, table: &str, row: NewRow) -> Result<RecordId, RecordStoreError>;

    /// Shallow-merge a JSON object patch into matching payloads; returns rows changed
    async fn update(
        &self,
        table: &str,
        matcher: &RowMatch,
        patch: Value,
    ) -> Result<u64, RecordStoreError>;

    async fn query(&self, table: &str, filter: &RowFilter) -> Result<Vec<Row>, RecordStoreError>;

    /// Delete a row; deleting a missing row is not an error
    async fn delete(&self, table: &str, id: RecordId) -> Result<(), RecordStoreError>;
}

/// Run a record store call under a deadline
pub async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<T, RecordStoreError>
where
    F: Future<Output = Result<T, RecordStoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RecordStoreError::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), "insert", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RecordStoreError::Timeout(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[test]
    fn test_filter_builders() {
        let submitter = Submitter::new("Hospital A").unwrap();
        let filter = RowFilter::submitter(&submitter).newest_first().with_id(RecordId(3));
        assert_eq!(filter.order, RowOrder::Newest);
        assert_eq!(filter.id, Some(RecordId(3)));
        assert_eq!(filter.submitter, Some(submitter));
    }
}
