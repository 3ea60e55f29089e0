//! Row CRUD operations
//!
//! All tables share one shape: `(id, submitter, payload JSON, created_at)`.
//! Table names are checked against the fixed table set before they are
//! interpolated into SQL.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use tracing::debug;

use super::schema::is_known_table;
use crate::error::RecordStoreError;
use crate::record_store::{NewRow, RecordId, Row, RowFilter, RowMatch, RowOrder};
use crate::submission::Submitter;

/// Map a rusqlite error, keeping constraint violations distinct
pub(crate) fn map_sql_error(table: &str, err: rusqlite::Error) -> RecordStoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => RecordStoreError::Constraint {
                table: table.to_string(),
                reason: err.to_string(),
            },
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure => RecordStoreError::Unavailable(err.to_string()),
            _ => RecordStoreError::Internal(format!("{}: {}", table, err)),
        },
        _ => RecordStoreError::Internal(format!("{}: {}", table, err)),
    }
}

fn check_table(table: &str) -> Result<(), RecordStoreError> {
    if is_known_table(table) {
        Ok(())
    } else {
        Err(RecordStoreError::Internal(format!("Unknown table: {}", table)))
    }
}

/// Timestamps are stored fixed-width so text order equals time order
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn raw_to_row(
    table: &str,
    id: i64,
    submitter: String,
    payload: String,
    created_at: String,
) -> Result<Row, RecordStoreError> {
    let malformed = |reason: String| RecordStoreError::Malformed {
        table: table.to_string(),
        reason: format!("row {}: {}", id, reason),
    };

    Ok(Row {
        id: RecordId(id),
        submitter: Submitter::new(submitter).map_err(|e| malformed(e.to_string()))?,
        payload: serde_json::from_str(&payload).map_err(|e| malformed(e.to_string()))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| malformed(e.to_string()))?
            .with_timezone(&Utc),
    })
}

/// Insert a row, returning its id
pub fn insert_row(conn: &Connection, table: &str, row: &NewRow) -> Result<RecordId, RecordStoreError> {
    check_table(table)?;

    let payload = serde_json::to_string(&row.payload)
        .map_err(|e| RecordStoreError::Internal(format!("Payload encode failed: {}", e)))?;

    conn.execute(
        &format!(
            "INSERT INTO {} (submitter, payload, created_at) VALUES (?, ?, ?)",
            table
        ),
        params![row.submitter.as_str(), payload, format_timestamp(Utc::now())],
    )
    .map_err(|e| map_sql_error(table, e))?;

    Ok(RecordId(conn.last_insert_rowid()))
}

/// Query rows matching a filter
pub fn query_rows(conn: &Connection, table: &str, filter: &RowFilter) -> Result<Vec<Row>, RecordStoreError> {
    check_table(table)?;

    let mut sql = format!("SELECT id, submitter, payload, created_at FROM {}", table);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
    let mut conditions = vec![];

    if let Some(ref submitter) = filter.submitter {
        conditions.push("submitter = ?");
        params.push(Box::new(submitter.as_str().to_string()));
    }

    if let Some(id) = filter.id {
        conditions.push("id = ?");
        params.push(Box::new(id.0));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(match filter.order {
        // AUTOINCREMENT ids follow insertion order even if the clock steps back
        RowOrder::Oldest => " ORDER BY id ASC",
        RowOrder::Newest => " ORDER BY id DESC",
    });

    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params.push(Box::new(limit as i64));
    }

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql).map_err(|e| map_sql_error(table, e))?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let raw = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| map_sql_error(table, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sql_error(table, e))?;

    raw.into_iter()
        .map(|(id, submitter, payload, created_at)| raw_to_row(table, id, submitter, payload, created_at))
        .collect()
}

/// Shallow-merge `patch` into the payload of every matching row
pub fn update_rows(
    conn: &mut Connection,
    table: &str,
    matcher: &RowMatch,
    patch: &Value,
) -> Result<u64, RecordStoreError> {
    check_table(table)?;

    let patch = patch.as_object().ok_or_else(|| RecordStoreError::Constraint {
        table: table.to_string(),
        reason: "update patch must be a JSON object".to_string(),
    })?;

    let filter = match matcher {
        RowMatch::Id(id) => RowFilter::default().with_id(*id),
        RowMatch::Submitter(submitter) => RowFilter::submitter(submitter),
    };

    let tx = conn.transaction().map_err(|e| map_sql_error(table, e))?;
    let rows = query_rows(&tx, table, &filter)?;

    let mut changed = 0u64;
    for row in rows {
        let mut payload = match row.payload {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in patch {
            payload.insert(key.clone(), value.clone());
        }

        let encoded = serde_json::to_string(&Value::Object(payload))
            .map_err(|e| RecordStoreError::Internal(format!("Payload encode failed: {}", e)))?;
        changed += tx
            .execute(
                &format!("UPDATE {} SET payload = ? WHERE id = ?", table),
                params![encoded, row.id.0],
            )
            .map_err(|e| map_sql_error(table, e))? as u64;
    }

    tx.commit().map_err(|e| map_sql_error(table, e))?;
    Ok(changed)
}

/// Delete a row by id; returns whether a row was removed
pub fn delete_row(conn: &Connection, table: &str, id: RecordId) -> Result<bool, RecordStoreError> {
    check_table(table)?;

    let changes = conn
        .execute(&format!("DELETE FROM {} WHERE id = ?", table), params![id.0])
        .map_err(|e| map_sql_error(table, e))?;

    Ok(changes > 0)
}

/// Count rows, optionally for one submitter
pub fn count_rows(conn: &Connection, table: &str, submitter: Option<&Submitter>) -> Result<u64, RecordStoreError> {
    check_table(table)?;

    let count: i64 = match submitter {
        Some(s) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE submitter = ?", table),
            params![s.as_str()],
            |row| row.get(0),
        ),
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0)),
    }
    .map_err(|e| map_sql_error(table, e))?;

    Ok(count as u64)
}
