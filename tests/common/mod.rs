#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sheet_sql::{
    error::Result,
    ingest::IngestOptions,
    service::{Service, UploadedFile},
    store::Store,
    translate::LanguageModel,
};
use tempfile::{TempDir, tempdir};

pub const SALES_CSV: &str = "Date,Amount,Region\n\
                             01/02/2024,10.5,north\n\
                             02/02/2024,2,south\n\
                             03/02/2024,1.5,north\n";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("sheet_sql.db")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Service over a database file inside the workspace.
    pub fn service(&self) -> Service {
        let store = Store::open(&self.database()).expect("open store");
        Service::new(store, IngestOptions::default())
    }
}

pub fn memory_service() -> Service {
    Service::new(
        Store::open_in_memory().expect("in-memory store"),
        IngestOptions::default(),
    )
}

pub fn upload(name: &str, contents: &[u8]) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        bytes: contents.to_vec(),
    }
}

/// Language model that answers every prompt with a canned reply, with
/// `{table}` replaced by the table named in the prompt.
pub struct ScriptedModel {
    reply: String,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: RefCell::new(Vec::new()),
        }
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        let table = prompt
            .split("The table name is ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or_default();
        Ok(self.reply.replace("{table}", table))
    }
}
