//! Runtime settings.
//!
//! Defaults are overlaid by an optional YAML file, then by `SHEET_SQL_*`
//! environment variables. CLI flags are applied last by the caller.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    ingest::IngestOptions,
};

pub const ENV_DATABASE: &str = "SHEET_SQL_DATABASE";
pub const ENV_MODEL_TOKEN: &str = "SHEET_SQL_MODEL_TOKEN";
pub const ENV_MODEL_ENDPOINT: &str = "SHEET_SQL_MODEL_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: PathBuf,
    pub table_prefix: String,
    pub sample_rows: usize,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model_id: String,
    pub token: Option<String>,
    pub temperature: f32,
    pub max_new_tokens: u32,
    /// No timeout when unset.
    pub timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("sheet_sql.db"),
            table_prefix: "All".to_string(),
            sample_rows: 5,
            model: ModelSettings::default(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models".to_string(),
            model_id: "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            token: None,
            temperature: 0.1,
            max_new_tokens: 512,
            timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(input).map_err(|err| Error::Config(format!("Parsing settings: {err}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut raw = String::new();
        File::open(path)
            .and_then(|mut file| file.read_to_string(&mut raw))
            .map_err(|err| Error::Config(format!("Reading settings file {path:?}: {err}")))?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.database = PathBuf::from(database);
        }
        if let Some(token) = lookup(ENV_MODEL_TOKEN).filter(|v| !v.is_empty()) {
            self.model.token = Some(token);
        }
        if let Some(endpoint) = lookup(ENV_MODEL_ENDPOINT).filter(|v| !v.is_empty()) {
            self.model.endpoint = endpoint;
        }
        self
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            table_prefix: self.table_prefix.clone(),
            sample_rows: self.sample_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_fields() {
        let settings = Settings::from_yaml_str(
            "database: /tmp/uploads.db\nmodel:\n  temperature: 0.3\n  timeout_secs: 20\n",
        )
        .unwrap();
        assert_eq!(settings.database, PathBuf::from("/tmp/uploads.db"));
        assert_eq!(settings.sample_rows, 5);
        assert_eq!(settings.model.temperature, 0.3);
        assert_eq!(settings.model.timeout_secs, Some(20));
        assert_eq!(settings.model.model_id, "mistralai/Mistral-7B-Instruct-v0.2");
    }

    #[test]
    fn environment_overrides_file_values() {
        let settings = Settings::default().with_env(|key| match key {
            ENV_MODEL_TOKEN => Some("hf_secret".to_string()),
            ENV_DATABASE => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.model.token.as_deref(), Some("hf_secret"));
        assert_eq!(settings.database, PathBuf::from("sheet_sql.db"));
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        assert!(matches!(
            Settings::from_yaml_str("sample_rows: [not, a, number]"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn settings_round_trip_through_yaml() {
        let settings = Settings::default();
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert_eq!(Settings::from_yaml_str(&yaml).unwrap(), settings);
    }
}
