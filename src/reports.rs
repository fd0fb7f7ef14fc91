use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sample::{self, TableSample},
    synth,
};

/// Named, described view over one synthesized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub table_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A report together with the sample of its backing table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub report: ReportDefinition,
    pub table: Option<TableSample>,
}

pub fn create(
    conn: &Connection,
    title: &str,
    description: &str,
    table_name: &str,
) -> Result<ReportDefinition> {
    let mut problems = Vec::new();
    if title.trim().is_empty() {
        problems.push("title: This field may not be blank.");
    }
    if description.trim().is_empty() {
        problems.push("description: This field may not be blank.");
    }
    if table_name.trim().is_empty() {
        problems.push("table: This field is required.");
    }
    if !problems.is_empty() {
        return Err(Error::Validation(problems.join(" ")));
    }
    match synth::lookup(conn, table_name) {
        Ok(_) => {}
        Err(Error::NotFound(_)) => {
            return Err(Error::Validation(format!(
                "table: Unknown table '{table_name}'."
            )));
        }
        Err(other) => return Err(other),
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO reports (title, description, table_name, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![title, description, table_name, now],
    )?;
    Ok(ReportDefinition {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        description: description.to_string(),
        table_name: table_name.to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<ReportDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, table_name, created_at, updated_at \
         FROM reports ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map([], map_report)?;
    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }
    Ok(reports)
}

pub fn detail(conn: &Connection, report: ReportDefinition) -> Result<ReportDetail> {
    let table = match sample::load(conn, &report.table_name) {
        Ok(sample) => Some(sample),
        Err(Error::NotFound(_)) => None,
        Err(other) => return Err(other),
    };
    Ok(ReportDetail { report, table })
}

fn map_report(row: &Row<'_>) -> rusqlite::Result<ReportDefinition> {
    Ok(ReportDefinition {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        table_name: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
