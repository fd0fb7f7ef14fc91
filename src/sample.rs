use std::io::Cursor;

use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::{
    data::Value,
    dataset::Dataset,
    error::{Error, Result},
    table::cell_text,
};

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSample {
    pub columns: Vec<String>,
    pub records: Vec<Map<String, JsonValue>>,
}

impl TableSample {
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    /// First `limit` rows of the dataset as JSON records.
    pub fn capture(dataset: &Dataset, limit: usize) -> Result<Self> {
        let columns = dataset.columns().to_vec();
        let mut records = Vec::with_capacity(limit.min(dataset.row_count()));
        for row in dataset.head(limit) {
            let mut record = Map::with_capacity(columns.len());
            for (column, value) in columns.iter().zip(row) {
                record.insert(column.clone(), sanitize_value(value)?);
            }
            records.push(record);
        }
        Ok(Self { columns, records })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| Error::Processing(format!("Writing CSV header: {err}")))?;
        for record in &self.records {
            let cells = self
                .columns
                .iter()
                .map(|column| record.get(column).map(cell_text).unwrap_or_default());
            writer
                .write_record(cells)
                .map_err(|err| Error::Processing(format!("Writing CSV row: {err}")))?;
        }
        writer
            .into_inner()
            .map_err(|err| Error::Processing(format!("Flushing CSV output: {err}")))
    }

    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, name) in self.columns.iter().enumerate() {
            sheet
                .write_string(0, col as u16, name)
                .map_err(xlsx_error)?;
        }
        for (row_idx, record) in self.records.iter().enumerate() {
            let row = row_idx as u32 + 1;
            for (col, name) in self.columns.iter().enumerate() {
                let col = col as u16;
                match record.get(name) {
                    None | Some(JsonValue::Null) => {}
                    Some(JsonValue::Number(n)) => {
                        if let Some(f) = n.as_f64() {
                            sheet.write_number(row, col, f).map_err(xlsx_error)?;
                        }
                    }
                    Some(JsonValue::Bool(b)) => {
                        sheet.write_boolean(row, col, *b).map_err(xlsx_error)?;
                    }
                    Some(other) => {
                        sheet
                            .write_string(row, col, cell_text(other))
                            .map_err(xlsx_error)?;
                    }
                }
            }
        }
        workbook.save_to_buffer().map_err(xlsx_error)
    }
}

fn xlsx_error(err: rust_xlsxwriter::XlsxError) -> Error {
    Error::Processing(format!("Writing XLSX output: {err}"))
}

/// Maps a cell onto JSON without leaking NaN or raw temporal values.
pub fn sanitize_value(value: &Value) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Number(n) if !n.is_finite() => JsonValue::Null,
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .ok_or_else(|| Error::Processing(format!("Number {n} is not JSON representable")))?,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => JsonValue::String(dt.date().format("%Y-%m-%d").to_string()),
        Value::Duration(d) => JsonValue::String(d.to_string()),
    })
}

/// Persists the sample for a registered table. Capture failures are logged
/// and swallowed so they never abort ingestion.
pub fn record_sample(conn: &Connection, table_name: &str, dataset: &Dataset, limit: usize) {
    let sample = if dataset.is_empty() {
        Ok(TableSample::empty(dataset.columns().to_vec()))
    } else {
        TableSample::capture(dataset, limit)
    };
    let outcome = sample.and_then(|sample| save(conn, table_name, &sample));
    match outcome {
        Ok(()) => debug!("Stored sample for {table_name}"),
        Err(err) => warn!("Skipping sample for {table_name}: {err}"),
    }
}

pub fn save(conn: &Connection, table_name: &str, sample: &TableSample) -> Result<()> {
    let data = serde_json::to_string(sample)?;
    conn.execute(
        "INSERT INTO table_samples (table_name, data) VALUES (?1, ?2)
         ON CONFLICT (table_name) DO UPDATE SET data = excluded.data",
        params![table_name, data],
    )?;
    Ok(())
}

pub fn load(conn: &Connection, table_name: &str) -> Result<TableSample> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM table_samples WHERE table_name = ?1",
            params![table_name],
            |row| row.get(0),
        )
        .optional()?;
    let data = data.ok_or_else(|| Error::NotFound(format!("Table data for '{table_name}'")))?;
    Ok(serde_json::from_str(&data)?)
}

/// Regenerates a file in the container format implied by `file_name`.
pub fn export(sample: &TableSample, file_name: &str) -> Result<(Vec<u8>, &'static str)> {
    let lowered = file_name.to_ascii_lowercase();
    if lowered.ends_with(".csv") {
        Ok((sample.to_csv_bytes()?, CSV_CONTENT_TYPE))
    } else if lowered.ends_with(".xlsx") {
        Ok((sample.to_xlsx_bytes()?, XLSX_CONTENT_TYPE))
    } else {
        Err(Error::UnsupportedFormat(file_name.to_string()))
    }
}

/// Reads the first worksheet back, used to verify exported workbooks.
pub fn xlsx_first_sheet_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    use calamine::{Reader, Xlsx};

    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| Error::Parse(format!("Opening workbook: {err}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Parse("Workbook has no worksheets".to_string()))?
        .map_err(|err| Error::Parse(format!("Reading worksheet: {err}")))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}
