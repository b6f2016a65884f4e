use crate::error::ConfigError;
use crate::invoice::AggregationMode;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = ".config/invoice_dashboard.toml";

pub const OCR_API_KEY_VAR: &str = "OCR_API_KEY";
pub const LLM_API_KEY_VAR: &str = "LLM_API_KEY";

const MAX_RETRIES_LIMIT: u32 = 10;
const RETRY_BACKOFF_LIMIT_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub ocr: OcrSection,
    pub llm: LlmSection,
    pub report: ReportSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8501
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub overlay: bool,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
    /// Where uploads are staged before submission; the system temp dir if unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_ocr_endpoint() -> String {
    "https://api.ocr.space/parse/image".to_string()
}

fn default_language() -> String {
    crate::ocr_client::DEFAULT_LANGUAGE.to_string()
}

fn default_ocr_timeout() -> u64 {
    60
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
            language: default_language(),
            overlay: false,
            timeout_secs: default_ocr_timeout(),
            staging_dir: None,
        }
    }
}

/// Which OpenAI-compatible chat endpoint to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Hosted API, authenticated with `LLM_API_KEY`.
    #[default]
    Remote,
    /// Local Ollama server, no key required.
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "EndpointSection::remote")]
    pub remote: EndpointSection,
    #[serde(default = "EndpointSection::ollama")]
    pub ollama: EndpointSection,
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_input_chars() -> usize {
    12_000
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_input_chars: default_max_input_chars(),
            remote: EndpointSection::remote(),
            ollama: EndpointSection::ollama(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    pub base_url: String,
    pub model: String,
}

impl EndpointSection {
    fn remote() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
        }
    }

    fn ollama() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen3:8b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportSection {
    #[serde(default)]
    pub aggregation: AggregationMode,
}

/// Provider credentials pulled from the environment at startup.
#[derive(Clone)]
pub struct Secrets {
    pub ocr_api_key: String,
    /// Absent only when the backend does not need one.
    pub llm_api_key: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("ocr_api_key", &"<redacted>")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Load an explicit path, or the default path if it exists, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::load(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_upload_bytes must be non-zero".into(),
            ));
        }
        if self.ocr.language.trim().is_empty() {
            return Err(ConfigError::Invalid("ocr.language must not be empty".into()));
        }
        if self.ocr.timeout_secs == 0 || self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.llm.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "llm.max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.llm.retry_backoff_ms > RETRY_BACKOFF_LIMIT_MS {
            return Err(ConfigError::Invalid(format!(
                "llm.retry_backoff_ms must be at most {RETRY_BACKOFF_LIMIT_MS}"
            )));
        }
        if self.llm.max_input_chars == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_input_chars must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Read the provider keys from the process environment.
    pub fn resolve_secrets(&self) -> Result<Secrets, ConfigError> {
        self.resolve_secrets_with(|name| std::env::var(name).ok())
    }

    fn resolve_secrets_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Secrets, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };

        let ocr_api_key = required(OCR_API_KEY_VAR)?;
        let llm_api_key = match self.llm.backend {
            LlmBackend::Remote => Some(required(LLM_API_KEY_VAR)?),
            LlmBackend::Ollama => None,
        };

        Ok(Secrets {
            ocr_api_key,
            llm_api_key,
        })
    }
}
