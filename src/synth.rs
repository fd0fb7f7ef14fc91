//! Column type inference and runtime table synthesis.
//!
//! [`infer_schema`] maps every dataset column onto one of three storage
//! types. [`synthesize`] replaces any existing table of the same name,
//! creates the relation with a surrogate key plus one column per inferred
//! type, registers the schema, and captures a bounded sample.
//! [`load_rows`] bulk-inserts the dataset afterwards.

use std::fmt;

use chrono::Utc;
use itertools::Itertools;
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    dataset::{Dataset, ValueKind},
    error::{Error, Result},
    sample,
    store::{self, Store, quote_ident},
};

/// Auto-increment key prepended to every synthesized table.
pub const SURROGATE_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Date,
    Numeric,
    Text,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Date => "DATE",
            ColumnType::Numeric => "DECIMAL",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn from_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Temporal => ColumnType::Date,
            // Rows present but every cell missing: a float column of NaNs.
            ValueKind::Numeric | ValueKind::Empty => ColumnType::Numeric,
            ValueKind::Text => ColumnType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn create_statement(&self) -> String {
        let mut defs = vec![format!("{SURROGATE_KEY} INTEGER PRIMARY KEY AUTOINCREMENT")];
        defs.extend(
            self.columns
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type())),
        );
        format!(
            "CREATE TABLE {} ({})",
            quote_ident(&self.table_name),
            defs.join(", ")
        )
    }

    pub fn insert_statement(&self) -> String {
        let columns = self.columns.iter().map(|c| quote_ident(&c.name)).join(", ");
        let placeholders = (1..=self.columns.len()).map(|i| format!("?{i}")).join(", ");
        if self.columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table_name))
        } else {
            format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders})",
                quote_ident(&self.table_name)
            )
        }
    }
}

/// Summary of a registered synthesized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredTable {
    pub schema: TableSchema,
    pub created_at: chrono::DateTime<Utc>,
}

pub fn infer_schema(table_name: &str, dataset: &Dataset) -> TableSchema {
    let columns = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| ColumnDef {
            name: name.clone(),
            // A header-only upload gives no evidence; keep its columns textual.
            column_type: if dataset.is_empty() {
                ColumnType::Text
            } else {
                ColumnType::from_kind(dataset.column_kind(idx))
            },
        })
        .collect();
    TableSchema {
        table_name: table_name.to_string(),
        columns,
    }
}

/// Creates (or replaces) the table for `dataset` and registers it.
pub fn synthesize(
    store: &Store,
    table_name: &str,
    dataset: &Dataset,
    sample_rows: usize,
) -> Result<TableSchema> {
    store::ensure_not_reserved(table_name)?;
    let schema = infer_schema(table_name, dataset);
    store
        .drop_table(table_name)
        .map_err(|err| Error::Processing(err.to_string()))?;

    let ddl = schema.create_statement();
    debug!("Synthesizing table: {ddl}");
    let conn = store.conn();
    conn.execute_batch(&ddl)
        .map_err(|err| Error::Processing(err.to_string()))?;
    register(conn, &schema).map_err(|err| Error::Processing(err.to_string()))?;

    sample::record_sample(conn, table_name, dataset, sample_rows);
    info!(
        "Synthesized table {table_name} with {} column(s)",
        schema.columns.len()
    );
    Ok(schema)
}

/// Appends every dataset row. There is no rollback of the created table if
/// an insert fails part way through.
pub fn load_rows(store: &mut Store, schema: &TableSchema, dataset: &Dataset) -> Result<usize> {
    let sql = schema.insert_statement();
    let tx = store.conn_mut().transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx
            .prepare(&sql)
            .map_err(|err| Error::Processing(err.to_string()))?;
        for (idx, row) in dataset.rows().iter().enumerate() {
            let bound = row
                .iter()
                .zip(&schema.columns)
                .map(|(value, column)| bind_value(value, column.column_type));
            stmt.execute(params_from_iter(bound)).map_err(|err| {
                Error::Processing(format!("Inserting row {}: {err}", idx + 1))
            })?;
            inserted += 1;
        }
    }
    tx.commit()
        .map_err(|err| Error::Processing(err.to_string()))?;
    debug!("Inserted {inserted} row(s) into {}", schema.table_name);
    Ok(inserted)
}

/// Converts a cell for storage in a column of `column_type`. Missing values
/// bind as NULL; date-times stored in DATE columns keep only their date.
pub fn bind_value(value: &Value, column_type: ColumnType) -> SqlValue {
    if value.is_missing() {
        return SqlValue::Null;
    }
    match (value, column_type) {
        (Value::Number(n), _) => SqlValue::Real(*n),
        (Value::Boolean(b), ColumnType::Text) => SqlValue::Text(b.to_string()),
        (Value::Boolean(b), _) => SqlValue::Integer(i64::from(*b)),
        (Value::DateTime(dt), ColumnType::Date) => {
            SqlValue::Text(dt.date().format("%Y-%m-%d").to_string())
        }
        (other, _) => SqlValue::Text(other.as_display()),
    }
}

fn register(conn: &Connection, schema: &TableSchema) -> Result<()> {
    let columns = serde_json::to_string(&schema.columns)?;
    conn.execute(
        "INSERT INTO table_registry (table_name, columns, created_at) VALUES (?1, ?2, ?3)",
        params![schema.table_name, columns, Utc::now()],
    )?;
    Ok(())
}

pub fn lookup(conn: &Connection, table_name: &str) -> Result<RegisteredTable> {
    let row: Option<(String, chrono::DateTime<Utc>)> = conn
        .query_row(
            "SELECT columns, created_at FROM table_registry WHERE table_name = ?1",
            params![table_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (columns, created_at) =
        row.ok_or_else(|| Error::NotFound(format!("Table '{table_name}'")))?;
    Ok(RegisteredTable {
        schema: TableSchema {
            table_name: table_name.to_string(),
            columns: serde_json::from_str(&columns)?,
        },
        created_at,
    })
}

pub fn list_tables(conn: &Connection) -> Result<Vec<RegisteredTable>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, columns, created_at FROM table_registry ORDER BY created_at DESC, table_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, chrono::DateTime<Utc>>(2)?,
        ))
    })?;
    let mut tables = Vec::new();
    for row in rows {
        let (table_name, columns, created_at) = row?;
        tables.push(RegisteredTable {
            schema: TableSchema {
                table_name,
                columns: serde_json::from_str(&columns)?,
            },
            created_at,
        });
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn sales() -> Dataset {
        let day = |d| Value::Date(NaiveDate::from_ymd_opt(2024, 2, d).unwrap());
        Dataset::new(
            vec!["date".into(), "amount".into(), "region".into()],
            vec![
                vec![day(1), Value::Number(10.5), Value::Text("north".into())],
                vec![day(2), Value::Null, Value::Text("south".into())],
                vec![Value::Null, Value::Number(4.0), Value::Text("north".into())],
            ],
        )
        .unwrap()
    }

    #[test]
    fn infer_schema_maps_value_kinds_to_storage_types() {
        let schema = infer_schema("t", &sales());
        let types: Vec<ColumnType> = schema.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![ColumnType::Date, ColumnType::Numeric, ColumnType::Text]
        );
        assert_eq!(
            schema.create_statement(),
            "CREATE TABLE \"t\" (id INTEGER PRIMARY KEY AUTOINCREMENT, \"date\" DATE, \"amount\" DECIMAL, \"region\" TEXT)"
        );
    }

    #[test]
    fn synthesize_creates_registers_and_samples() {
        let mut store = Store::open_in_memory().unwrap();
        let dataset = sales();
        let schema = synthesize(&store, "All_sales_01-02-2024_abcdef12", &dataset, 5).unwrap();
        let inserted = load_rows(&mut store, &schema, &dataset).unwrap();
        assert_eq!(inserted, 3);

        let count: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*), SUM(amount) FROM \"All_sales_01-02-2024_abcdef12\"",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);

        let registered = lookup(store.conn(), "All_sales_01-02-2024_abcdef12").unwrap();
        assert_eq!(registered.schema, schema);
        let stored = sample::load(store.conn(), "All_sales_01-02-2024_abcdef12").unwrap();
        assert_eq!(stored.records.len(), 3);
    }

    #[test]
    fn synthesize_replaces_existing_table() {
        let mut store = Store::open_in_memory().unwrap();
        let first = synthesize(&store, "dup", &sales(), 5).unwrap();
        load_rows(&mut store, &first, &sales()).unwrap();

        let narrow = Dataset::new(vec!["only".into()], vec![vec![Value::Text("x".into())]]).unwrap();
        let second = synthesize(&store, "dup", &narrow, 5).unwrap();
        load_rows(&mut store, &second, &narrow).unwrap();

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM \"dup\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(lookup(store.conn(), "dup").unwrap().schema.columns.len(), 1);
    }

    #[test]
    fn empty_dataset_still_records_empty_sample() {
        let store = Store::open_in_memory().unwrap();
        let empty = Dataset::new(vec!["a".into()], Vec::new()).unwrap();
        synthesize(&store, "empty_one", &empty, 5).unwrap();
        let stored = sample::load(store.conn(), "empty_one").unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.columns, vec!["a".to_string()]);
    }

    #[test]
    fn header_only_columns_are_text_but_all_missing_rows_are_numeric() {
        let header_only = Dataset::new(vec!["a".into(), "b".into()], Vec::new()).unwrap();
        let schema = infer_schema("t", &header_only);
        assert!(schema.columns.iter().all(|c| c.column_type == ColumnType::Text));

        let all_missing = Dataset::new(vec!["a".into()], vec![vec![Value::Null]]).unwrap();
        let schema = infer_schema("t", &all_missing);
        assert_eq!(schema.columns[0].column_type, ColumnType::Numeric);
    }

    #[test]
    fn identifiers_with_quotes_and_spaces_are_tolerated() {
        let mut store = Store::open_in_memory().unwrap();
        let dataset = Dataset::new(
            vec!["weird \"name\"".into()],
            vec![vec![Value::Number(1.0)]],
        )
        .unwrap();
        let schema = synthesize(&store, "odd table", &dataset, 5).unwrap();
        assert_eq!(load_rows(&mut store, &schema, &dataset).unwrap(), 1);
    }

    #[test]
    fn bind_value_nulls_missing_and_truncates_datetimes_in_date_columns() {
        assert_eq!(bind_value(&Value::Number(f64::NAN), ColumnType::Numeric), SqlValue::Null);
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            bind_value(&Value::DateTime(dt), ColumnType::Date),
            SqlValue::Text("2024-05-06".into())
        );
        assert_eq!(
            bind_value(&Value::Boolean(true), ColumnType::Numeric),
            SqlValue::Integer(1)
        );
    }
}
