// src/llm_extract.rs

use crate::config::{LLM_API_KEY_VAR, LlmBackend, LlmSection};
use crate::error::{ConfigError, ExtractError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// The prompt template that instructs the model to extract structured invoice data.
const SYSTEM_PROMPT: &str = r#"You are an Invoice Intelligence Agent operating inside a Personal Finance Dashboard.

TASK
Extract structured invoice data from OCR text.

STRICT RULES
- Use only the following keys:
  - Invoice_Number
  - Invoice_Date
  - Vendor_Name
  - Currency
  - Subtotal
  - Total_Amount
  - Category
  - Item_Name
  - Quantity
  - Unit_Price
  - Line_Total
  - Items (optional list of objects with Item_Name, Quantity, Unit_Price, Line_Total)
- No tax extraction or inference. Never invent or derive tax fields.
- Do not hallucinate missing values. Use null for anything not present in the text.
- Normalize dates to YYYY-MM-DD.
- Normalize money to plain numbers: no currency symbols, no thousands separators.
- Choose exactly one Category per invoice using keyword reasoning over the vendor and item text.

OUTPUT
Return ONLY a single JSON object using the keys above, no commentary."#;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: Option<String>,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(
    llm: &LlmSection,
    api_key: Option<&str>,
) -> Result<ResolvedEndpoint, ConfigError> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.trim_end_matches('/').to_string(),
                model: llm.ollama.model.clone(),
                api_key: None,
            })
        }
        LlmBackend::Remote => {
            let api_key = api_key.ok_or(ConfigError::MissingSecret(LLM_API_KEY_VAR))?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.trim_end_matches('/').to_string(),
                model: llm.remote.model.clone(),
                api_key: Some(api_key.to_string()),
            })
        }
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn user_message(ocr_text: &str) -> String {
    format!("Here is the OCR text:\n\n{ocr_text}")
}

pub struct LlmClient {
    client: Client,
    endpoint: ResolvedEndpoint,
    backend: LlmBackend,
    max_retries: u32,
    retry_backoff: Duration,
    max_input_chars: usize,
}

impl LlmClient {
    pub fn new(llm: &LlmSection, api_key: Option<&str>) -> Result<Self, ConfigError> {
        let endpoint = resolve_endpoint(llm, api_key)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build LLM HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            backend: llm.backend,
            max_retries: llm.max_retries,
            retry_backoff: Duration::from_millis(llm.retry_backoff_ms),
            max_input_chars: llm.max_input_chars,
        })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    /// Check that a local backend is reachable. Remote backends always pass.
    pub async fn check_health(&self) -> bool {
        if self.backend != LlmBackend::Ollama {
            return true;
        }

        // Ollama's health endpoint is at the root (not under /v1)
        let health_url = self.endpoint.base_url.trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama server is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama server not reachable");
                false
            }
        }
    }

    /// Send OCR text to the model and return its reply verbatim.
    ///
    /// Timeouts, connection failures, 429 and 5xx are retried with
    /// exponential backoff up to `max_retries` times.
    pub async fn complete(&self, ocr_text: &str) -> Result<String, ExtractError> {
        let text = truncate_chars(ocr_text, self.max_input_chars);
        if text.len() < ocr_text.len() {
            warn!(
                chars = self.max_input_chars,
                "OCR text truncated before model call"
            );
        }

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user_message(text)),
                },
            ],
            temperature: 0.0,
        };

        let mut attempt = 0;
        loop {
            match self.send(&request).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient model error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, ExtractError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let chat_response: ChatResponse = serde_json::from_str(&body)?;
        first_content(chat_response)
    }
}

fn first_content(response: ChatResponse) -> Result<String, ExtractError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(ExtractError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_closed_key_set() {
        for key in crate::invoice::COLUMNS {
            assert!(SYSTEM_PROMPT.contains(key), "prompt is missing {key}");
        }
        assert!(SYSTEM_PROMPT.contains("Items"));
        assert!(SYSTEM_PROMPT.contains("YYYY-MM-DD"));
        assert!(SYSTEM_PROMPT.contains("No tax extraction"));
        assert!(SYSTEM_PROMPT.contains("exactly one Category"));
    }

    #[test]
    fn test_user_message_carries_text() {
        assert!(user_message("Bread 2 x 3.00").ends_with("Bread 2 x 3.00"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("€€€", 0), "");
    }

    #[test]
    fn test_remote_requires_key() {
        let llm = LlmSection::default();
        assert!(matches!(
            resolve_endpoint(&llm, None),
            Err(ConfigError::MissingSecret("LLM_API_KEY"))
        ));
        let endpoint = resolve_endpoint(&llm, Some("k")).unwrap();
        assert_eq!(endpoint.api_key.as_deref(), Some("k"));
        assert!(!endpoint.base_url.ends_with('/'));
    }

    #[test]
    fn test_ollama_has_no_key() {
        let llm = LlmSection {
            backend: LlmBackend::Ollama,
            ..LlmSection::default()
        };
        let endpoint = resolve_endpoint(&llm, Some("ignored")).unwrap();
        assert!(endpoint.api_key.is_none());
        assert_eq!(endpoint.base_url, "http://localhost:11434/v1");
    }

    use crate::config::EndpointSection;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Chat endpoint that fails `failures` times with `status`, then answers.
    #[derive(Clone)]
    struct MockChat {
        hits: Arc<AtomicUsize>,
        failures: usize,
        status: StatusCode,
    }

    async fn chat(State(mock): State<MockChat>, headers: HeaderMap) -> Response {
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer test-key")
        );
        let hit = mock.hits.fetch_add(1, Ordering::SeqCst);
        if hit < mock.failures {
            return (mock.status, "busy").into_response();
        }
        Json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{}"}}]
        }))
        .into_response()
    }

    async fn spawn_chat(
        failures: usize,
        status: StatusCode,
        max_retries: u32,
    ) -> (LlmClient, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/v1/chat/completions", post(chat))
            .with_state(MockChat {
                hits: hits.clone(),
                failures,
                status,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let llm = LlmSection {
            max_retries,
            retry_backoff_ms: 1,
            remote: EndpointSection {
                base_url: format!("http://{addr}/v1/"),
                model: "test-model".to_string(),
            },
            ..LlmSection::default()
        };
        (LlmClient::new(&llm, Some("test-key")).unwrap(), hits)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (client, hits) = spawn_chat(2, StatusCode::SERVICE_UNAVAILABLE, 2).await;
        assert_eq!(client.complete("Bread 2 x 3.00").await.unwrap(), "{}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_limit() {
        let (client, hits) = spawn_chat(2, StatusCode::SERVICE_UNAVAILABLE, 1).await;
        let err = client.complete("Bread").await.unwrap_err();
        assert!(matches!(err, ExtractError::Status { status: 503, ref body } if body == "busy"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let (client, hits) = spawn_chat(1, StatusCode::TOO_MANY_REQUESTS, 2).await;
        assert!(client.complete("Bread").await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_fail_immediately() {
        let (client, hits) = spawn_chat(5, StatusCode::BAD_REQUEST, 2).await;
        let err = client.complete("Bread").await.unwrap_err();
        assert!(matches!(err, ExtractError::Status { status: 400, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let llm = LlmSection {
            max_retries: 1,
            retry_backoff_ms: 1,
            remote: EndpointSection {
                base_url: format!("http://{addr}/v1"),
                model: "test-model".to_string(),
            },
            ..LlmSection::default()
        };
        let client = LlmClient::new(&llm, Some("test-key")).unwrap();
        let err = client.complete("Bread").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_first_content() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"```json\n{}\n```"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(resp).unwrap(), "```json\n{}\n```");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            first_content(empty),
            Err(ExtractError::EmptyResponse)
        ));
    }
}
