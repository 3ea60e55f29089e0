//! SQLite record store
//!
//! Backs the record store gateway with a single SQLite file.
//!
//! ## Tables
//!
//! - `pending_<category>` - staged records, one table per category
//! - permanent tables per category (`academic_activities`, `awards`, ...)
//! - `summary_documents` - versioned annual summary documents
//! - `work_summary` - contact details, one row per submitter
//!
//! Each table has its own AUTOINCREMENT sequence, so staged and committed ids
//! never share a namespace.

pub mod rows;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RecordStoreError;
use crate::record_store::{NewRow, RecordId, RecordStore, Row, RowFilter, RowMatch};
use crate::submission::Submitter;

/// SQLite database for staged and committed rows
///
/// Calls run synchronously on the caller's task and finish within the first
/// poll, so the per-call deadline from `record_store::with_timeout` never
/// fires for this store. It only bounds record stores that actually await.
pub struct RecordDb {
    conn: Mutex<Connection>,
}

impl RecordDb {
    /// Open or create the record database
    pub fn open(path: &Path) -> Result<Self, RecordStoreError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| RecordStoreError::Unavailable(format!("Failed to open SQLite: {}", e)))?;

        // WAL keeps readers unblocked during commit batches
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| RecordStoreError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(schema::init_schema)?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, RecordStoreError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            RecordStoreError::Unavailable(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(schema::init_schema)?;

        Ok(db)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, RecordStoreError>
    where
        F: FnOnce(&Connection) -> Result<T, RecordStoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RecordStoreError::Unavailable(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, RecordStoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RecordStoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RecordStoreError::Unavailable(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<DbStats, RecordStoreError> {
        self.with_conn(|conn| {
            let mut tables = Vec::new();
            for table in schema::table_names() {
                tables.push(TableCount {
                    table: table.to_string(),
                    rows: rows::count_rows(conn, table, None)?,
                });
            }
            Ok(DbStats { tables })
        })
    }

    /// Row count for one table, optionally for a single submitter
    pub fn count(&self, table: &str, submitter: Option<&Submitter>) -> Result<u64, RecordStoreError> {
        self.with_conn(|conn| rows::count_rows(conn, table, submitter))
    }
}

#[async_trait]
impl RecordStore for RecordDb {
    async fn insert(&self, table: &str, row: NewRow) -> Result<RecordId, RecordStoreError> {
        self.with_conn(|conn| rows::insert_row(conn, table, &row))
    }

    async fn update(
        &self,
        table: &str,
        matcher: &RowMatch,
        patch: Value,
    ) -> Result<u64, RecordStoreError> {
        self.with_conn_mut(|conn| rows::update_rows(conn, table, matcher, &patch))
    }

    async fn query(&self, table: &str, filter: &RowFilter) -> Result<Vec<Row>, RecordStoreError> {
        self.with_conn(|conn| rows::query_rows(conn, table, filter))
    }

    async fn delete(&self, table: &str, id: RecordId) -> Result<(), RecordStoreError> {
        let removed = self.with_conn(|conn| rows::delete_row(conn, table, id))?;
        if !removed {
            debug!(table, id = %id, "Delete of absent row");
        }
        Ok(())
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub tables: Vec<TableCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}
