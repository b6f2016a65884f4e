// src/ocr_client.rs

use crate::config::OcrSection;
use crate::error::{ConfigError, OcrError};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Language sent when none is configured.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Response body of the OCR.space `parse/image` endpoint.
///
/// Every field is optional on the wire; error responses omit `ParsedResults`
/// or send it as `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OcrResponse {
    #[serde(default)]
    pub parsed_results: Option<Vec<ParsedResult>>,
    #[serde(default)]
    pub is_errored_on_processing: bool,
    /// A string or a list of strings, depending on the failure.
    #[serde(default)]
    pub error_message: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParsedResult {
    #[serde(default)]
    pub parsed_text: Option<String>,
}

impl OcrResponse {
    /// Text of the first parsed result, or `""` when there are no results.
    pub fn first_parsed_text(&self) -> &str {
        self.parsed_results
            .as_deref()
            .and_then(<[ParsedResult]>::first)
            .and_then(|r| r.parsed_text.as_deref())
            .unwrap_or("")
    }

    pub fn error_message(&self) -> String {
        match &self.error_message {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

fn mime_for(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Lower-cased extension of a file name, if any.
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

pub struct OcrClient {
    client: Client,
    endpoint: String,
    api_key: String,
    language: String,
    overlay: bool,
    staging_dir: Option<PathBuf>,
}

impl OcrClient {
    pub fn new(cfg: &OcrSection, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build OCR HTTP client: {e}")))?;

        info!(endpoint = %cfg.endpoint, language = %cfg.language, "OCR client ready");
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key,
            language: cfg.language.clone(),
            overlay: cfg.overlay,
            staging_dir: cfg.staging_dir.clone(),
        })
    }

    /// Upload one file and return the provider's raw response.
    pub async fn fetch(&self, path: &Path, display_name: &str) -> Result<OcrResponse, OcrError> {
        let bytes = tokio::fs::read(path).await?;
        debug!(bytes = bytes.len(), file = %display_name, "Submitting file to OCR");

        let part = Part::bytes(bytes)
            .file_name(display_name.to_string())
            .mime_str(mime_for(display_name))?;
        let form = Form::new()
            .text("isOverlayRequired", self.overlay.to_string())
            .text("apikey", self.api_key.clone())
            .text("language", self.language.clone())
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// OCR an in-memory upload.
    ///
    /// The bytes are staged in a temporary file that is removed when this
    /// returns, whatever the outcome.
    pub async fn recognize_upload(&self, filename: &str, bytes: &[u8]) -> Result<String, OcrError> {
        let suffix = extension(filename)
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("invoice-").suffix(&suffix);
        let mut staged = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        staged.write_all(bytes)?;
        staged.flush()?;

        let response = self.fetch(staged.path(), filename).await?;
        usable_text(response)
    }
}

/// Pull the first parsed text out of a response, rejecting empty output.
pub fn usable_text(response: OcrResponse) -> Result<String, OcrError> {
    let text = response.first_parsed_text();
    if text.trim().is_empty() {
        if response.is_errored_on_processing {
            return Err(OcrError::Provider(response.error_message()));
        }
        return Err(OcrError::Empty);
    }
    info!(chars = text.len(), "OCR text extracted");
    Ok(text.to_string())
}
