//! Versioned audit log of uploads.
//!
//! Versions are scoped to the original filename: each new entry takes one
//! more than the highest version recorded for that filename. The lookup and
//! the insert are separate statements, so two concurrent uploads of the same
//! filename may share a version.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: i64,
    pub report_id: Uuid,
    pub file_name: String,
    pub table_name: String,
    pub upload_timestamp: DateTime<Utc>,
    pub num_columns: usize,
    pub num_rows: usize,
    pub version: i64,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Fields supplied by the caller when recording an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub file_name: String,
    pub table_name: String,
    pub num_columns: usize,
    pub num_rows: usize,
    pub version: i64,
    pub title: Option<String>,
    pub description: Option<String>,
}

const SELECT_COLUMNS: &str = "id, report_id, file_name, table_name, upload_timestamp, \
     num_columns, num_rows, version, title, description";

pub fn next_version(conn: &Connection, file_name: &str) -> Result<i64> {
    let latest: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM upload_log WHERE file_name = ?1",
        params![file_name],
        |row| row.get(0),
    )?;
    Ok(latest.unwrap_or(0) + 1)
}

pub fn record(conn: &Connection, entry: NewUpload) -> Result<UploadRecord> {
    let report_id = Uuid::new_v4();
    let upload_timestamp = Utc::now();
    conn.execute(
        "INSERT INTO upload_log (report_id, file_name, table_name, upload_timestamp, \
         num_columns, num_rows, version, title, description) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            report_id.to_string(),
            entry.file_name,
            entry.table_name,
            upload_timestamp,
            entry.num_columns as i64,
            entry.num_rows as i64,
            entry.version,
            entry.title,
            entry.description,
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(
        "Recorded upload {report_id} for '{}' v{}",
        entry.file_name, entry.version
    );
    Ok(UploadRecord {
        id,
        report_id,
        file_name: entry.file_name,
        table_name: entry.table_name,
        upload_timestamp,
        num_columns: entry.num_columns,
        num_rows: entry.num_rows,
        version: entry.version,
        title: entry.title,
        description: entry.description,
    })
}

/// Newest first, optionally restricted to one filename.
pub fn list(conn: &Connection, file_name: Option<&str>) -> Result<Vec<UploadRecord>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM upload_log \
         WHERE (?1 IS NULL OR file_name = ?1) \
         ORDER BY upload_timestamp DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![file_name], map_record)?;
    collect_records(rows)
}

/// Case-insensitive substring search over filename, table name, title and
/// description.
pub fn search(conn: &Connection, term: &str) -> Result<Vec<UploadRecord>> {
    let pattern = format!("%{}%", escape_like(term.trim()));
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM upload_log \
         WHERE file_name LIKE ?1 ESCAPE '\\' OR table_name LIKE ?1 ESCAPE '\\' \
            OR title LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\' \
         ORDER BY upload_timestamp DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![pattern], map_record)?;
    collect_records(rows)
}

pub fn get(conn: &Connection, report_id: &Uuid) -> Result<UploadRecord> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM upload_log WHERE report_id = ?1");
    conn.query_row(&sql, params![report_id.to_string()], map_record)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Report {report_id}")))
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<UploadRecord>>,
) -> Result<Vec<UploadRecord>> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<UploadRecord> {
    let report_id: String = row.get(1)?;
    let report_id = Uuid::parse_str(&report_id).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(UploadRecord {
        id: row.get(0)?,
        report_id,
        file_name: row.get(2)?,
        table_name: row.get(3)?,
        upload_timestamp: row.get(4)?,
        num_columns: row.get::<_, i64>(5)? as usize,
        num_rows: row.get::<_, i64>(6)? as usize,
        version: row.get(7)?,
        title: row.get(8)?,
        description: row.get(9)?,
    })
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
