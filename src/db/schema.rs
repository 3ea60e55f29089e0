//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::category::Category;
use crate::error::RecordStoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Per-submitter contact details and latest summary reference
pub const WORK_SUMMARY_TABLE: &str = "work_summary";

/// Every table the record store serves
pub fn table_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Category::ALL
        .iter()
        .flat_map(|c| [c.pending_table(), c.committed_table()])
        .collect();
    names.push(WORK_SUMMARY_TABLE);
    names
}

pub fn is_known_table(table: &str) -> bool {
    table_names().contains(&table)
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), RecordStoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, RecordStoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| RecordStoreError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), RecordStoreError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| RecordStoreError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| RecordStoreError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// DDL for one row table; names come from the fixed table set only
fn table_ddl(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    submitter TEXT NOT NULL CHECK (length(trim(submitter)) > 0),
    payload TEXT NOT NULL CHECK (json_valid(payload)),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{table}_submitter ON {table}(submitter, created_at);
"#
    )
}

fn create_tables(conn: &Connection) -> Result<(), RecordStoreError> {
    for table in table_names() {
        conn.execute_batch(&table_ddl(table))
            .map_err(|e| RecordStoreError::Internal(format!("Failed to create {}: {}", table, e)))?;
    }

    // One contact row per submitter; upserts rely on this
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_work_summary_unique ON work_summary(submitter);",
    )
    .map_err(|e| RecordStoreError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        for table in table_names() {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_known_tables() {
        assert!(is_known_table("pending_academic"));
        assert!(is_known_table("summary_documents"));
        assert!(is_known_table(WORK_SUMMARY_TABLE));
        assert!(!is_known_table("sqlite_master"));
    }
}
