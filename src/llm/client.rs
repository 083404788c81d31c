//! Provider-specific LLM transport with retry, timeout, and rate limiting.
//!
//! Two adapters (OpenAI, Anthropic) share one retry core: the rate-limit
//! permit is taken once per logical call, each attempt runs under its own
//! deadline, and only 429/5xx statuses or timeouts earn another attempt.

use crate::config::Config;
use crate::llm::rate_limit::RateLimiter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

const MAX_BACKOFF_EXPONENT: u32 = 6;
const JITTER_MAX_MS: u64 = 500;

/// Which hosted service answers fix requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai", alias = "OpenAI", alias = "OpenAi")]
    OpenAi,
    #[serde(rename = "anthropic", alias = "Anthropic")]
    Anthropic,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_ENDPOINT,
            Provider::Anthropic => ANTHROPIC_ENDPOINT,
        }
    }

    /// Environment variables are the only accepted credential source.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key: set {0}")]
    MissingApiKey(&'static str),
    #[error("request timed out after {attempts} attempt(s) of {timeout:?} each")]
    Timeout { attempts: u32, timeout: Duration },
    #[error("provider returned HTTP {status}: {body}")]
    Fatal { status: u16, body: String },
    #[error("retries exhausted after {attempts} attempt(s), last HTTP {status}")]
    RetriesExhausted { status: u16, attempts: u32 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider response had no usable content: {0}")]
    MalformedResponse(String),
    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Cancellation maps to `Skipped` downstream, everything else to
    /// `AiError`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// One attempt's failure, before retry classification.
#[derive(Debug)]
enum SendError {
    Http { status: u16, body: String },
    Network(reqwest::Error),
    Malformed(String),
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ─── wire shapes ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageBody,
}

#[derive(Deserialize)]
struct OpenAiMessageBody {
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

// ─── client ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    provider: Provider,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    retry_count: u32,
}

impl LlmClient {
    /// Build a client from config, reading the credential from the
    /// provider's environment variable.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let provider = config.provider;
        let api_key = std::env::var(provider.api_key_env())
            .map_err(|_| LlmError::MissingApiKey(provider.api_key_env()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            provider,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| provider.default_endpoint().to_string()),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout),
            retry_count: config.retry_count,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Send one fix request. Holds a single rate-limit permit across all
    /// attempts; retries 429/5xx and per-attempt timeouts with exponential
    /// backoff plus jitter.
    pub async fn request_fix(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let _permit = RateLimiter::global()
            .acquire(self.provider.name(), cancel)
            .await
            .ok_or(LlmError::Cancelled)?;

        let max_attempts = self.retry_count + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                result = tokio::time::timeout(self.timeout, self.send_once(system, user)) => result,
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            };

            match outcome {
                Err(_elapsed) => {
                    warn!(attempt, timeout = ?self.timeout, "LLM attempt timed out");
                    if attempt >= max_attempts {
                        return Err(LlmError::Timeout {
                            attempts: attempt,
                            timeout: self.timeout,
                        });
                    }
                }
                Ok(Ok(text)) => {
                    debug!(attempt, provider = self.provider.name(), "LLM call succeeded");
                    return Ok(text);
                }
                Ok(Err(SendError::Http { status, body })) if is_retryable_status(status) => {
                    warn!(attempt, status, body = %body, "retryable provider status");
                    if attempt >= max_attempts {
                        return Err(LlmError::RetriesExhausted {
                            status,
                            attempts: attempt,
                        });
                    }
                }
                Ok(Err(SendError::Http { status, body })) => {
                    return Err(LlmError::Fatal { status, body });
                }
                Ok(Err(SendError::Network(err))) => return Err(LlmError::Network(err)),
                Ok(Err(SendError::Malformed(detail))) => {
                    return Err(LlmError::MalformedResponse(detail));
                }
            }

            self.backoff(attempt, cancel).await?;
        }
    }

    /// `2^(attempt-1)` seconds plus up to half a second of jitter, capped,
    /// and woken immediately by cancellation.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), LlmError> {
        let exponent = (attempt.saturating_sub(1)).min(MAX_BACKOFF_EXPONENT);
        let jitter_ms = rand::thread_rng().gen_range(0..JITTER_MAX_MS);
        let delay = Duration::from_secs(1u64 << exponent) + Duration::from_millis(jitter_ms);
        debug!(?delay, "backing off before retry");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
        }
    }

    async fn send_once(&self, system: &str, user: &str) -> Result<String, SendError> {
        let request = match self.provider {
            Provider::OpenAi => self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&OpenAiRequest {
                    model: &self.model,
                    messages: vec![
                        OpenAiMessage {
                            role: "system",
                            content: system,
                        },
                        OpenAiMessage {
                            role: "user",
                            content: user,
                        },
                    ],
                    max_tokens: self.max_tokens,
                    temperature: self.temperature,
                }),
            Provider::Anthropic => self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&AnthropicRequest {
                    model: &self.model,
                    system,
                    messages: vec![AnthropicMessage {
                        role: "user",
                        content: user,
                    }],
                    max_tokens: self.max_tokens,
                }),
        };

        let response = request.send().await.map_err(SendError::Network)?;
        let status = response.status();
        let body = response.text().await.map_err(SendError::Network)?;

        if !status.is_success() {
            return Err(SendError::Http {
                status: status.as_u16(),
                body: crate::context::truncate_chars(&body, 300),
            });
        }

        match self.provider {
            Provider::OpenAi => parse_openai_body(&body),
            Provider::Anthropic => parse_anthropic_body(&body),
        }
    }
}

fn parse_openai_body(body: &str) -> Result<String, SendError> {
    let parsed: OpenAiResponse = serde_json::from_str(body)
        .map_err(|e| SendError::Malformed(format!("openai response: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| SendError::Malformed("openai response had no choices".to_string()))
}

fn parse_anthropic_body(body: &str) -> Result<String, SendError> {
    let parsed: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| SendError::Malformed(format!("anthropic response: {}", e)))?;
    parsed
        .content
        .into_iter()
        .find(|block| block.block_type == "text")
        .map(|block| block.text)
        .ok_or_else(|| SendError::Malformed("anthropic response had no text block".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_classification() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "status {}", status);
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "status {}", status);
        }
    }

    #[test]
    fn test_provider_defaults() {
        assert_eq!(
            Provider::OpenAi.default_endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            Provider::Anthropic.default_endpoint(),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(Provider::OpenAi.api_key_env(), "OPENAI_API_KEY");
        assert_eq!(Provider::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_provider_deserializes_both_casings() {
        assert_eq!(
            serde_json::from_str::<Provider>("\"openai\"").unwrap(),
            Provider::OpenAi
        );
        assert_eq!(
            serde_json::from_str::<Provider>("\"OpenAI\"").unwrap(),
            Provider::OpenAi
        );
        assert_eq!(
            serde_json::from_str::<Provider>("\"Anthropic\"").unwrap(),
            Provider::Anthropic
        );
    }

    #[test]
    fn test_openai_request_shape() {
        let request = OpenAiRequest {
            model: "gpt-4o",
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: "sys",
                },
                OpenAiMessage {
                    role: "user",
                    content: "usr",
                },
            ],
            max_tokens: 8000,
            temperature: 0.2,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "usr");
        assert_eq!(value["max_tokens"], 8000);
        assert!((value["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_anthropic_request_shape() {
        let request = AnthropicRequest {
            model: "claude-sonnet-4-5",
            system: "sys",
            messages: vec![AnthropicMessage {
                role: "user",
                content: "usr",
            }],
            max_tokens: 8000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["system"], "sys");
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_parse_openai_body() {
        let body = r#"{"choices":[{"message":{"content":"the fix"}}]}"#;
        assert_eq!(parse_openai_body(body).unwrap(), "the fix");
    }

    #[test]
    fn test_parse_openai_body_without_choices() {
        assert!(parse_openai_body(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_parse_anthropic_body_picks_first_text_block() {
        let body = r#"{"content":[{"type":"thinking","text":"hmm"},{"type":"text","text":"the fix"}]}"#;
        assert_eq!(parse_anthropic_body(body).unwrap(), "the fix");
    }

    #[test]
    fn test_parse_anthropic_body_without_text_block() {
        assert!(parse_anthropic_body(r#"{"content":[{"type":"tool_use"}]}"#).is_err());
    }

    #[test]
    fn test_missing_api_key_error_names_variable() {
        let config = Config::default();
        std::env::remove_var("OPENAI_API_KEY");
        let err = LlmClient::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
