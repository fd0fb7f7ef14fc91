//! Error taxonomy shared by the ingestion, translation and execution layers.
//!
//! Every failure a caller can observe is a variant of [`Error`]. Routing
//! layers use [`Error::kind`] and [`Error::status`] to pick a response
//! class without matching on individual variants.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unable to decode file with encoding: {}", attempted.join(", "))]
    Decoding { attempted: Vec<String> },

    #[error("Invalid file type: {0}")]
    UnsupportedFormat(String),

    #[error("Error parsing file data: {0}")]
    Parse(String),

    #[error("Error processing data: {0}")]
    Processing(String),

    #[error("Could not extract SQL from generated text: {raw}")]
    Extraction { raw: String },

    #[error("Generated SQL rejected ({reason}): {sql}")]
    RejectedSql { sql: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Query execution failed: {message}")]
    Execution { sql: String, message: String },

    #[error("Language model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientInput,
    Processing,
    Extraction,
    Lookup,
    Validation,
    Execution,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_)
            | Error::Decoding { .. }
            | Error::UnsupportedFormat(_)
            | Error::Parse(_) => ErrorKind::ClientInput,
            Error::Processing(_) => ErrorKind::Processing,
            Error::Extraction { .. } | Error::RejectedSql { .. } => ErrorKind::Extraction,
            Error::NotFound(_) => ErrorKind::Lookup,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Execution { .. } => ErrorKind::Execution,
            Error::Model(_)
            | Error::Config(_)
            | Error::Storage(_)
            | Error::Json(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status for the error class.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::ClientInput | ErrorKind::Extraction | ErrorKind::Validation => 400,
            ErrorKind::Lookup => 404,
            ErrorKind::Processing | ErrorKind::Execution | ErrorKind::Internal => 500,
        }
    }

    /// Raw model output attached to extraction failures.
    pub fn raw_model_output(&self) -> Option<&str> {
        match self {
            Error::Extraction { raw } => Some(raw),
            _ => None,
        }
    }
}
