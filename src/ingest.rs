//! Upload ingestion pipeline.
//!
//! Raw file bytes flow through these steps, each failing fast with a typed
//! [`Error`]:
//!
//! 1. **Format**: the extension selects the CSV or XLSX parser.
//! 2. **Decode** (CSV only): declared encoding, else UTF-8, else a single
//!    retry with the encoding guessed by `chardetng`.
//! 3. **Parse**: missing-value tokens become nulls; CSV columns are typed as
//!    numbers or day-first dates when every present cell agrees.
//! 4. **Headers**: placeholder columns are dropped, names are normalised.
//! 5. **Numeric coercion** of numeric-looking text columns.
//! 6. **Synthesize + load** into a freshly named table.
//! 7. **Ledger** entry with the next version for the filename.

use std::{collections::HashSet, io::Cursor, sync::OnceLock};

use calamine::{Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    data::{self, Value},
    dataset::{Dataset, ValueKind},
    error::{Error, Result},
    ledger::{self, NewUpload, UploadRecord},
    store::Store,
    synth::{self, TableSchema},
};

pub const PLACEHOLDER_PREFIX: &str = "Unnamed: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
}

impl FileFormat {
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let lowered = file_name.to_ascii_lowercase();
        if lowered.ends_with(".csv") {
            Ok(FileFormat::Csv)
        } else if lowered.ends_with(".xlsx") {
            Ok(FileFormat::Xlsx)
        } else {
            Err(Error::UnsupportedFormat(file_name.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub table_prefix: String,
    pub sample_rows: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            table_prefix: "All".to_string(),
            sample_rows: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub encoding: Option<&'a str>,
}

/// Cells nulled by numeric coercion, per column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoercionReport {
    pub columns: Vec<(String, usize)>,
}

impl CoercionReport {
    pub fn total_nulled(&self) -> usize {
        self.columns.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub record: UploadRecord,
    pub schema: TableSchema,
    pub coercion: CoercionReport,
    pub encoding: Option<String>,
}

/// Header cells and data rows as parsed, before header normalisation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<Value>,
    pub rows: Vec<Vec<Value>>,
}

pub fn ingest(store: &mut Store, options: &IngestOptions, request: &UploadRequest) -> Result<UploadRecord> {
    ingest_detailed(store, options, request).map(|outcome| outcome.record)
}

pub fn ingest_detailed(
    store: &mut Store,
    options: &IngestOptions,
    request: &UploadRequest,
) -> Result<IngestOutcome> {
    if request.file_name.trim().is_empty() {
        return Err(Error::BadRequest("No file uploaded".to_string()));
    }
    let format = FileFormat::from_file_name(request.file_name)?;
    info!(
        "Ingesting '{}' ({} byte(s), {:?})",
        request.file_name,
        request.bytes.len(),
        format
    );

    let (raw, encoding) = match format {
        FileFormat::Csv => {
            let (text, encoding) = decode(request.bytes, request.encoding)?;
            (parse_csv(&text)?, Some(encoding.name().to_string()))
        }
        FileFormat::Xlsx => (parse_xlsx(request.bytes)?, None),
    };

    let mut dataset = normalize_headers(raw)?;
    let coercion = coerce_numeric_columns(&mut dataset);
    if coercion.total_nulled() > 0 {
        warn!(
            "Numeric coercion nulled {} cell(s) in '{}': {:?}",
            coercion.total_nulled(),
            request.file_name,
            coercion.columns
        );
    }

    let table_name = generate_table_name(
        &options.table_prefix,
        request.file_name,
        Utc::now().date_naive(),
    );
    let schema = synth::synthesize(store, &table_name, &dataset, options.sample_rows)?;
    synth::load_rows(store, &schema, &dataset)?;

    let version = ledger::next_version(store.conn(), request.file_name)?;
    let record = ledger::record(
        store.conn(),
        NewUpload {
            file_name: request.file_name.to_string(),
            table_name,
            num_columns: dataset.column_count(),
            num_rows: dataset.row_count(),
            version,
            title: request.title.map(str::to_string),
            description: request.description.map(str::to_string),
        },
    )?;
    info!(
        "Uploaded '{}' as {} (version {}, {} row(s))",
        record.file_name, record.table_name, record.version, record.num_rows
    );
    Ok(IngestOutcome {
        record,
        schema,
        coercion,
        encoding,
    })
}

/// Decodes text with the declared encoding, or UTF-8 followed by one
/// detection-driven retry.
pub fn decode(bytes: &[u8], declared: Option<&str>) -> Result<(String, &'static Encoding)> {
    if let Some(label) = declared.map(str::trim).filter(|l| !l.is_empty()) {
        let encoding = resolve_label(label).ok_or_else(|| Error::Decoding {
            attempted: vec![label.to_string()],
        })?;
        return decode_with(bytes, encoding).ok_or_else(|| Error::Decoding {
            attempted: vec![label.to_string()],
        });
    }
    if let Some(decoded) = decode_with(bytes, UTF_8) {
        return Ok(decoded);
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let detected = detector.guess(None, true);
    debug!("UTF-8 decode failed; detected {}", detected.name());
    let mut attempted = vec![UTF_8.name().to_string()];
    if detected != UTF_8 {
        attempted.push(detected.name().to_string());
        if let Some(decoded) = decode_with(bytes, detected) {
            return Ok(decoded);
        }
    }
    Err(Error::Decoding { attempted })
}

/// Looks up an encoding label, also accepting codec spellings such as
/// `latin-1`, `utf_8` or `cp-1252`.
pub fn resolve_label(label: &str) -> Option<&'static Encoding> {
    let lowered = label.trim().to_ascii_lowercase().replace('_', "-");
    let canonical = match lowered.as_str() {
        "latin-1" | "l1" | "iso8859-1" | "8859" => "latin1".to_string(),
        "utf-8-sig" | "utf8-sig" | "u8" => "utf-8".to_string(),
        "utf-16-le" => "utf-16le".to_string(),
        "utf-16-be" => "utf-16be".to_string(),
        other => match (other.strip_prefix("cp-"), other.strip_prefix("iso8859-")) {
            (Some(code), _) => format!("cp{code}"),
            (_, Some(part)) => format!("iso-8859-{part}"),
            _ => other.to_string(),
        },
    };
    Encoding::for_label(canonical.as_bytes())
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Option<(String, &'static Encoding)> {
    let (text, actual, had_errors) = encoding.decode(bytes);
    (!had_errors).then(|| (text.into_owned(), actual))
}

pub fn parse_csv(text: &str) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();
    let headers = match records.next() {
        Some(record) => record.map_err(|err| Error::Parse(err.to_string()))?,
        None => return Err(Error::Parse("No columns to parse from file".to_string())),
    };
    let headers: Vec<Value> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if name.is_empty() {
                Value::Text(format!("{PLACEHOLDER_PREFIX}{idx}"))
            } else {
                Value::Text(name.to_string())
            }
        })
        .collect();

    let width = headers.len();
    let mut cells: Vec<Vec<Option<String>>> = Vec::new();
    for (idx, record) in records.enumerate() {
        let record = record.map_err(|err| Error::Parse(err.to_string()))?;
        if record.len() > width {
            return Err(Error::Parse(format!(
                "Expected {width} field(s) in line {}, saw {}",
                idx + 2,
                record.len()
            )));
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|field| (!data::is_missing_token(field)).then(|| field.to_string()))
            .collect();
        row.resize(width, None);
        cells.push(row);
    }

    let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(width); cells.len()];
    for col in 0..width {
        let column: Vec<Option<&str>> = cells.iter().map(|row| row[col].as_deref()).collect();
        for (row, value) in rows.iter_mut().zip(type_csv_column(&column)) {
            row.push(value);
        }
    }
    Ok(RawTable { headers, rows })
}

fn type_csv_column(cells: &[Option<&str>]) -> Vec<Value> {
    let present = || cells.iter().flatten();
    if present().all(|cell| data::parse_number(cell).is_some()) {
        return cells
            .iter()
            .map(|cell| cell.and_then(data::parse_number).map_or(Value::Null, Value::Number))
            .collect();
    }
    if present().all(|cell| data::parse_temporal(cell).is_some()) {
        return cells
            .iter()
            .map(|cell| cell.and_then(data::parse_temporal).unwrap_or(Value::Null))
            .collect();
    }
    cells
        .iter()
        .map(|cell| cell.map_or(Value::Null, |s| Value::Text(s.to_string())))
        .collect()
}

pub fn parse_xlsx(bytes: &[u8]) -> Result<RawTable> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| Error::Parse(format!("Opening workbook: {err}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::Parse("Workbook has no worksheets".to_string()))?
        .map_err(|err| Error::Parse(format!("Reading worksheet: {err}")))?;
    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell_value(cell) {
                Value::Null => Value::Text(format!("{PLACEHOLDER_PREFIX}{idx}")),
                other => other,
            })
            .collect(),
        None => return Err(Error::Parse("No columns to parse from file".to_string())),
    };
    let rows = rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    Ok(RawTable { headers, rows })
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Number(*i as f64),
        Data::Float(f) => Value::Number(*f),
        Data::Bool(b) => Value::Boolean(*b),
        Data::String(s) if data::is_missing_token(s) => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) if dt.is_duration() => {
            dt.as_duration().map_or(Value::Null, Value::Duration)
        }
        Data::DateTime(dt) => dt.as_datetime().map_or(Value::Null, |value| {
            if value.time() == NaiveTime::MIN {
                Value::Date(value.date())
            } else {
                Value::DateTime(value)
            }
        }),
        Data::DateTimeIso(s) => data::parse_temporal(s).unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^unnamed").expect("valid placeholder regex"))
}

pub fn is_placeholder_header(header: &Value) -> bool {
    header
        .as_text()
        .is_some_and(|name| placeholder_pattern().is_match(name))
}

pub fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Promotes a blank header row, drops placeholder columns and normalises
/// the remaining names into a [`Dataset`].
pub fn normalize_headers(raw: RawTable) -> Result<Dataset> {
    let RawTable {
        mut headers,
        mut rows,
    } = raw;

    if !headers.is_empty() && headers.iter().all(is_placeholder_header) && !rows.is_empty() {
        debug!("Header row is blank; promoting first data row");
        let promoted = rows.remove(0);
        headers = (0..headers.len())
            .map(|idx| match promoted.get(idx) {
                Some(Value::Null) | None => Value::Text(format!("{PLACEHOLDER_PREFIX}{idx}")),
                Some(Value::Text(s)) if s.trim().is_empty() => {
                    Value::Text(format!("{PLACEHOLDER_PREFIX}{idx}"))
                }
                Some(other) => other.clone(),
            })
            .collect();
    }

    let keep: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, header)| !is_placeholder_header(header))
        .map(|(idx, _)| idx)
        .collect();

    let names: Vec<String> = keep
        .iter()
        .enumerate()
        .map(|(position, &idx)| match &headers[idx] {
            Value::Text(name) if !normalize_header(name).is_empty() => normalize_header(name),
            _ => format!("col_{position}"),
        })
        .collect();
    let names = dedupe_names(names);

    let rows = rows
        .into_iter()
        .map(|row| {
            keep.iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Dataset::new(names, rows)
}

// The surrogate key owns `id`, so an uploaded `id` column becomes `id_1`.
fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len() + 1);
    seen.insert(synth::SURROGATE_KEY.to_string());
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut suffix = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{name}_{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}

/// Coerces values to numbers; anything unparseable becomes null. Returns the
/// coerced values and how many present cells were nulled.
pub fn coerce_numeric(values: &[Value]) -> (Vec<Value>, usize) {
    let mut nulled = 0usize;
    let coerced = values
        .iter()
        .map(|value| match value {
            Value::Number(n) => Value::Number(*n),
            Value::Boolean(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => data::parse_number(s).map_or_else(
                || {
                    nulled += 1;
                    Value::Null
                },
                Value::Number,
            ),
            Value::Null => Value::Null,
            _ => {
                nulled += 1;
                Value::Null
            }
        })
        .collect();
    (coerced, nulled)
}

/// A text column looks numeric when more than half of its present cells
/// parse as numbers.
pub fn looks_numeric<'a>(values: impl IntoIterator<Item = &'a Value>) -> bool {
    let (mut present, mut numeric) = (0usize, 0usize);
    for value in values.into_iter().filter(|v| !v.is_missing()) {
        present += 1;
        let parses = match value {
            Value::Number(_) => true,
            Value::Text(s) => data::parse_number(s).is_some(),
            _ => false,
        };
        if parses {
            numeric += 1;
        }
    }
    present > 0 && numeric * 2 > present
}

pub fn coerce_numeric_columns(dataset: &mut Dataset) -> CoercionReport {
    let mut report = CoercionReport::default();
    for idx in 0..dataset.column_count() {
        if dataset.column_kind(idx) != ValueKind::Text || !looks_numeric(dataset.column_values(idx)) {
            continue;
        }
        let values: Vec<Value> = dataset.column_values(idx).cloned().collect();
        let (coerced, nulled) = coerce_numeric(&values);
        dataset.replace_column(idx, coerced);
        debug!(
            "Coerced column '{}' to numeric ({nulled} cell(s) nulled)",
            dataset.columns()[idx]
        );
        if nulled > 0 {
            report.columns.push((dataset.columns()[idx].clone(), nulled));
        }
    }
    report
}

/// Strips the last extension and replaces every non-alphanumeric character
/// with an underscore.
pub fn sanitize_filename(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn generate_table_name(prefix: &str, file_name: &str, today: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}_{}_{}_{}",
        sanitize_filename(file_name),
        today.format("%d-%m-%Y"),
        &suffix[..8]
    )
}
