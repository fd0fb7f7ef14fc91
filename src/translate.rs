//! Natural-language to SQL translation.
//!
//! The translator asks a hosted text-generation model for a query over a
//! single synthesized table, then pulls one `SELECT ... FROM ...;` statement
//! out of the free-form reply. Replies without such a statement fail with
//! [`Error::Extraction`] carrying the raw text. Statements that carry
//! comments or data-changing keywords are refused with
//! [`Error::RejectedSql`].

use std::{sync::OnceLock, time::Duration};

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    config::ModelSettings,
    error::{Error, Result},
    store::quote_ident,
};

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "PRAGMA",
    "VACUUM", "TRUNCATE", "GRANT", "REINDEX",
];

/// Text-generation backend.
pub trait LanguageModel {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

pub fn build_prompt(table_name: &str, columns: &[String], question: &str) -> String {
    format!(
        "Generate a SQL query to answer the following question: {question}. \
         Use only the columns provided. Do not use any other tables or columns. \
         The table name is {table_name} and the available columns are: {}. \
         Return ONLY valid SQL. Do not include any explanations or surrounding text.",
        columns.join(", ")
    )
}

fn select_start() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bSELECT\s").expect("valid select regex"))
}

fn select_from() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^SELECT\s+.*?\s+FROM\s+\S").expect("valid select-from regex")
    })
}

fn forbidden_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|")))
            .expect("valid keyword regex")
    })
}

/// First `SELECT ... FROM ...` statement terminated by `;`, without the
/// terminator. Semicolons inside quoted text do not end the statement, and
/// any surrounding ```` ```sql ```` fence is ignored.
pub fn extract_sql(raw: &str) -> Result<String> {
    for found in select_start().find_iter(raw) {
        let tail = &raw[found.start()..];
        let Some(end) = statement_end(tail) else {
            continue;
        };
        let candidate = tail[..end].trim();
        if select_from().is_match(candidate) {
            return Ok(candidate.to_string());
        }
    }
    Err(Error::Extraction {
        raw: raw.to_string(),
    })
}

/// Byte offset of the first `;` outside single- or double-quoted text.
fn statement_end(sql: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in sql.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, ';') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

/// Refuses comments and data-changing keywords in an extracted statement.
pub fn guard_sql(sql: &str) -> Result<()> {
    let reject = |reason: String| Error::RejectedSql {
        sql: sql.to_string(),
        reason,
    };
    let bare = strip_quoted(sql);
    if bare.contains("--") || bare.contains("/*") {
        return Err(reject("comments are not allowed".to_string()));
    }
    if let Some(found) = forbidden_pattern().find(&bare) {
        return Err(reject(format!(
            "keyword {} is not allowed",
            found.as_str().to_ascii_uppercase()
        )));
    }
    Ok(())
}

// Drops the contents of string literals and quoted identifiers, keeping the
// quotes themselves.
fn strip_quoted(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match (quote, ch) {
            (Some(open), c) if c == open => {
                quote = None;
                out.push(c);
            }
            (Some(_), _) => {}
            (None, '\'' | '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (None, c) => out.push(c),
        }
    }
    out
}

/// Rewrites bare `FROM table` references to the quoted identifier.
pub fn quote_table_references(sql: &str, table_name: &str) -> String {
    let pattern = format!(r"(?i:\b(FROM|JOIN))(\s+){}\b", regex::escape(table_name));
    match Regex::new(&pattern) {
        Ok(re) => {
            let quoted = quote_ident(table_name);
            re.replace_all(sql, |caps: &regex::Captures<'_>| {
                format!("{}{}{quoted}", &caps[1], &caps[2])
            })
            .into_owned()
        }
        Err(_) => sql.to_string(),
    }
}

pub struct Translator<M> {
    model: M,
}

impl<M: LanguageModel> Translator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn translate(&self, table_name: &str, columns: &[String], question: &str) -> Result<String> {
        let prompt = build_prompt(table_name, columns, question);
        debug!("Prompting model for table {table_name}");
        let generated = self.model.generate(&prompt)?;
        let generated = generated.trim();
        debug!("Generated SQL (before extraction): {generated}");
        let sql = extract_sql(generated)?;
        guard_sql(&sql)?;
        let sql = quote_table_references(&sql, table_name);
        info!("Extracted SQL: {sql}");
        Ok(sql)
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batch(Vec<GeneratedText>),
    Single(GeneratedText),
    Error { error: String },
}

/// Hugging Face hosted inference client.
#[derive(Debug)]
pub struct HuggingFaceModel {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
    temperature: f32,
    max_new_tokens: u32,
}

impl HuggingFaceModel {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout_secs.map(Duration::from_secs))
            .build()
            .map_err(|err| Error::Model(format!("Building HTTP client: {err}")))?;
        Ok(Self {
            client,
            url: format!(
                "{}/{}",
                settings.endpoint.trim_end_matches('/'),
                settings.model_id
            ),
            token: settings.token.clone(),
            temperature: settings.temperature,
            max_new_tokens: settings.max_new_tokens,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LanguageModel for HuggingFaceModel {
    fn generate(&self, prompt: &str) -> Result<String> {
        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters {
                temperature: self.temperature,
                max_new_tokens: self.max_new_tokens,
                return_full_text: false,
            },
        };
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .map_err(|err| Error::Model(format!("Request to {} failed: {err}", self.url)))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| Error::Model(format!("Reading model response: {err}")))?;
        if !status.is_success() {
            return Err(Error::Model(format!("Model endpoint returned {status}: {body}")));
        }
        parse_inference_response(&body)
    }
}

fn parse_inference_response(body: &str) -> Result<String> {
    let parsed: InferenceResponse = serde_json::from_str(body)
        .map_err(|err| Error::Model(format!("Unexpected model response ({err}): {body}")))?;
    match parsed {
        InferenceResponse::Batch(mut items) if !items.is_empty() => {
            Ok(items.swap_remove(0).generated_text)
        }
        InferenceResponse::Batch(_) => Err(Error::Model("Model returned no text".to_string())),
        InferenceResponse::Single(item) => Ok(item.generated_text),
        InferenceResponse::Error { error } => Err(Error::Model(error)),
    }
}
