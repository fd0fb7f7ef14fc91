use log::{error, info};
use rusqlite::{Connection, types::ValueRef};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::{
    error::{Error, Result},
    store::Store,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as objects keyed by column name.
    pub fn records(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

pub struct Executor<'a> {
    store: &'a Store,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Opens a connection, runs `sql` inside a transaction, fetches every row
    /// and commits. Failures surface as [`Error::Execution`], so an empty
    /// result always means the statement ran and matched nothing.
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        let mut conn = self.store.connect()?;
        let result = run(&mut conn, sql).map_err(|err| {
            error!("Database error running '{sql}': {err}");
            Error::Execution {
                sql: sql.to_string(),
                message: err.to_string(),
            }
        })?;
        info!(
            "Query returned {} row(s) across {} column(s)",
            result.rows.len(),
            result.columns.len()
        );
        Ok(result)
    }
}

fn run(conn: &mut Connection, sql: &str) -> rusqlite::Result<QueryResult> {
    let tx = conn.transaction()?;
    let result = {
        let mut stmt = tx.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(cell_to_json(row.get_ref(idx)?));
            }
            rows.push(values);
        }
        QueryResult { columns, rows }
    };
    tx.commit()?;
    Ok(result)
}

fn cell_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
