use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::{
    config::Settings,
    error::{Error, Result},
    executor::Executor,
    ingest::{self, IngestOptions, IngestOutcome, UploadRequest},
    ledger::{self, UploadRecord},
    reports::{self, ReportDefinition, ReportDetail},
    sample::{self, TableSample},
    store::Store,
    synth::{self, RegisteredTable},
    translate::{LanguageModel, Translator},
};

/// A file as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadFilter {
    pub file_name: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub generated_sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOverview {
    #[serde(flatten)]
    pub table: RegisteredTable,
    pub sample: Option<TableSample>,
}

/// Owns the store and ingestion options; the language model is passed per query.
pub struct Service {
    store: Store,
    options: IngestOptions,
}

impl Service {
    pub fn new(store: Store, options: IngestOptions) -> Self {
        Self { store, options }
    }

    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Store::open(&settings.database)?;
        info!("Opened database {:?}", settings.database);
        Ok(Self::new(store, settings.ingest_options()))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn upload(
        &mut self,
        file: Option<&UploadedFile>,
        title: Option<&str>,
        description: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<UploadRecord> {
        self.upload_detailed(file, title, description, encoding)
            .map(|outcome| outcome.record)
    }

    pub fn upload_detailed(
        &mut self,
        file: Option<&UploadedFile>,
        title: Option<&str>,
        description: Option<&str>,
        encoding: Option<&str>,
    ) -> Result<IngestOutcome> {
        let file = file.ok_or_else(|| Error::BadRequest("No file uploaded".to_string()))?;
        let request = UploadRequest {
            file_name: &file.file_name,
            bytes: &file.bytes,
            title,
            description,
            encoding,
        };
        ingest::ingest_detailed(&mut self.store, &self.options, &request)
    }

    pub fn list_uploads(&self, filter: &UploadFilter) -> Result<Vec<UploadRecord>> {
        let conn = self.store.conn();
        let mut records = match filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(term) => ledger::search(conn, term)?,
            None => return ledger::list(conn, filter.file_name.as_deref()),
        };
        if let Some(file_name) = &filter.file_name {
            records.retain(|record| &record.file_name == file_name);
        }
        Ok(records)
    }

    /// Unparseable ids are reported as missing records.
    pub fn get_upload(&self, report_id: &str) -> Result<UploadRecord> {
        let id = Uuid::parse_str(report_id.trim())
            .map_err(|_| Error::NotFound(format!("Report {report_id}")))?;
        ledger::get(self.store.conn(), &id)
    }

    /// Regenerates the uploaded file from the stored sample of its table.
    pub fn download_file(&self, report_id: &str) -> Result<DownloadedFile> {
        let record = self.get_upload(report_id)?;
        let table_sample = sample::load(self.store.conn(), &record.table_name)?;
        let (bytes, content_type) = sample::export(&table_sample, &record.file_name)?;
        debug!(
            "Regenerated {} byte(s) of {content_type} for report {}",
            bytes.len(),
            record.report_id
        );
        Ok(DownloadedFile {
            bytes,
            content_type,
            file_name: record.file_name,
        })
    }

    pub fn query<M: LanguageModel>(
        &self,
        model: M,
        table_name: &str,
        question: &str,
    ) -> Result<QueryResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::BadRequest("No query provided".to_string()));
        }
        let table = synth::lookup(self.store.conn(), table_name)?;
        let columns = table.schema.column_names();
        let sql = Translator::new(model).translate(table_name, &columns, question)?;
        let result = Executor::new(&self.store).execute(&sql)?;
        info!(
            "Answered '{question}' on {table_name} with {} row(s)",
            result.rows.len()
        );
        Ok(QueryResponse {
            question: question.to_string(),
            generated_sql: sql,
            rows: result.records(),
            columns: result.columns,
        })
    }

    pub fn create_report(
        &self,
        title: &str,
        description: &str,
        table_name: &str,
    ) -> Result<ReportDefinition> {
        reports::create(self.store.conn(), title, description, table_name)
    }

    pub fn list_reports(&self) -> Result<Vec<ReportDetail>> {
        let conn = self.store.conn();
        reports::list(conn)?
            .into_iter()
            .map(|report| reports::detail(conn, report))
            .collect()
    }

    pub fn list_tables(&self) -> Result<Vec<TableOverview>> {
        let conn = self.store.conn();
        synth::list_tables(conn)?
            .into_iter()
            .map(|table| {
                let sample = match sample::load(conn, &table.schema.table_name) {
                    Ok(sample) => Some(sample),
                    Err(Error::NotFound(_)) => None,
                    Err(other) => return Err(other),
                };
                Ok(TableOverview { table, sample })
            })
            .collect()
    }

    pub fn drop_table(&self, table_name: &str) -> Result<()> {
        if !self.store.drop_table(table_name)? {
            return Err(Error::NotFound(format!("Table '{table_name}'")));
        }
        info!("Dropped table {table_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl LanguageModel for Fixed {
        fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn service() -> Service {
        Service::new(Store::open_in_memory().unwrap(), IngestOptions::default())
    }

    fn csv(name: &str, body: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn upload_without_file_is_bad_request() {
        let mut service = service();
        let err = service.upload(None, None, None, None).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn malformed_report_id_is_not_found() {
        let service = service();
        assert!(matches!(
            service.download_file("not-a-uuid"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn query_validates_question_and_table() {
        let mut service = service();
        let record = service
            .upload(Some(&csv("t.csv", "a\n1\n")), None, None, None)
            .unwrap();
        assert!(matches!(
            service.query(Fixed("SELECT a FROM t;"), &record.table_name, "  "),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            service.query(Fixed("SELECT a FROM t;"), "ghost", "anything"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn extraction_failure_keeps_raw_model_text() {
        let mut service = service();
        let record = service
            .upload(Some(&csv("t.csv", "a\n1\n")), None, None, None)
            .unwrap();
        let err = service
            .query(Fixed("I cannot help with that"), &record.table_name, "sum of a")
            .unwrap_err();
        assert_eq!(err.raw_model_output(), Some("I cannot help with that"));
    }

    #[test]
    fn list_uploads_combines_search_and_filename() {
        let mut service = service();
        service
            .upload(Some(&csv("a.csv", "x\n1\n")), Some("Budget"), None, None)
            .unwrap();
        service
            .upload(Some(&csv("b.csv", "x\n1\n")), Some("Budget"), None, None)
            .unwrap();
        let filter = UploadFilter {
            file_name: Some("b.csv".to_string()),
            search: Some("budget".to_string()),
        };
        let found = service.list_uploads(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, "b.csv");
    }

    #[test]
    fn dropping_unknown_table_is_not_found() {
        let service = service();
        assert!(matches!(
            service.drop_table("nothing_here"),
            Err(Error::NotFound(_))
        ));
    }
}
