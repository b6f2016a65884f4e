// src/error.rs

//! Error types for each stage of invoice processing.

use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// A required secret is absent from the environment.
    #[error("missing required secret: set the {0} environment variable")]
    MissingSecret(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the OCR provider round trip.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Network failure or timeout.
    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OCR request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered but flagged the job as errored.
    #[error("OCR provider reported an error: {0}")]
    Provider(String),

    #[error("OCR response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// OCR succeeded but produced no usable text.
    #[error("OCR returned no text")]
    Empty,

    #[error("failed to stage upload for OCR: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the language model call.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no choices")]
    EmptyResponse,

    #[error("model response envelope could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ExtractError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Request(e) => e.is_timeout() || e.is_connect(),
            ExtractError::Status { status, .. } => *status == 429 || *status >= 500,
            ExtractError::EmptyResponse | ExtractError::Decode(_) => false,
        }
    }
}

/// Errors turning model output into an invoice object.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unparsable model output: {0}")]
    Unparsable(#[source] serde_json::Error),

    #[error("unexpected shape: expected a JSON object, got {0}")]
    UnexpectedShape(&'static str),
}

/// A per-file failure. Reported against the filename, never fatal to the batch.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The upload's bytes could not be read from local disk.
    #[error("could not read file: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl FileError {
    /// Short machine-readable stage name used in reports and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            FileError::UnsupportedType(_) | FileError::Read(_) => "upload",
            FileError::Ocr(_) => "ocr",
            FileError::Extract(_) => "model",
            FileError::Parse(_) => "parse",
        }
    }
}
