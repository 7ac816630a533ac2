//! Text-generation collaborator and its retry policy.
//!
//! - **[`OpenAiGenerator`]**: OpenAI-compatible `POST /chat/completions`.
//! - **[`DisabledGenerator`]**: always fails with [`GenerationError::Disabled`].
//! - **[`ScriptedGenerator`]**: replays canned results; for tests and demos.
//!
//! # Retry Strategy
//!
//! [`generate_with_retry`] is a bounded loop returning a tagged
//! [`RetryOutcome`]:
//! - HTTP 429, 5xx, and network errors → retry
//! - any other failure → stop immediately
//! - backoff: `initial`, `2 × initial`, `4 × initial`, ... for at most
//!   `max_retries` retries (default 2)

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sales_insight_core::intent::{ConversationTurn, Role};

use crate::config::{
    Config, Credentials, GenerationConfig, MAX_GENERATION_RETRIES, OPENAI_API_KEY,
};
use crate::error::{ConfigError, GenerationError};

/// Upper bound on a server-provided `Retry-After` hint.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// One chat message sent to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: turn.content.clone(),
        }
    }
}

/// `{systemPrompt, messages}` as sent to the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier for logs.
    fn model_name(&self) -> &str;

    /// Produce the assistant reply for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Instantiate the generator selected by `[generation]`.
pub fn create_generator(
    config: &Config,
    credentials: &Credentials,
) -> Result<Arc<dyn TextGenerator>, ConfigError> {
    match config.generation.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let key = credentials
                .openai_api_key
                .clone()
                .ok_or_else(|| ConfigError::Missing(vec![OPENAI_API_KEY.to_string()]))?;
            Ok(Arc::new(OpenAiGenerator::new(&config.generation, key)))
        }
        other => Err(ConfigError::Invalid(format!(
            "unknown generation.provider '{}'",
            other
        ))),
    }
}

// ============ Retry loop ============

/// Bounded retry settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Retries are capped at [`MAX_GENERATION_RETRIES`] even when the
    /// config was built by hand.
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries.min(MAX_GENERATION_RETRIES),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1 << retry.saturating_sub(1).min(10))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Result of [`generate_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Success { text: String, attempts: u32 },
    Exhausted { last_error: GenerationError, attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Call `generator`, retrying transient failures per `policy`.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    policy: RetryPolicy,
) -> RetryOutcome {
    let mut attempts = 0;
    let mut retry_hint = None;

    loop {
        if attempts > 0 {
            let base = policy.delay_for(attempts);
            let delay = match retry_hint.take() {
                Some(hint) => base.max(hint).min(MAX_RETRY_AFTER.max(base)),
                None => base,
            };
            tokio::time::sleep(delay).await;
        }
        attempts += 1;

        match generator.generate(request).await {
            Ok(text) => return RetryOutcome::Success { text, attempts },
            Err(err) if err.is_transient() && attempts <= policy.max_retries => {
                tracing::warn!(
                    model = generator.model_name(),
                    attempt = attempts,
                    error = %err,
                    "transient generation failure, retrying"
                );
                if let GenerationError::RateLimited { retry_after } = &err {
                    retry_hint = *retry_after;
                }
            }
            Err(last_error) => {
                tracing::warn!(
                    model = generator.model_name(),
                    attempts,
                    error = %last_error,
                    "generation failed"
                );
                return RetryOutcome::Exhausted {
                    last_error,
                    attempts,
                };
            }
        }
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenAI ============

/// Chat-completions client for OpenAI-compatible APIs.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        }
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role, "content": m.content })),
        );
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        })
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
pub fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".to_string()))
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| GenerationError::Malformed(e.to_string()))?;
            return parse_chat_response(&json);
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GenerationError::RateLimited { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(GenerationError::Server {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(GenerationError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

// ============ Scripted ============

/// Replays a fixed sequence of results and records every request.
///
/// Once the script runs out, further calls fail with
/// [`GenerationError::Malformed`].
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with `text`.
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string()); 64])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(GenerationError::Malformed("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "Use only the figures provided.".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "How are we doing?".to_string(),
            }],
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn server_error() -> GenerationError {
        GenerationError::Server {
            status: 503,
            body: "busy".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_policy_caps_retries() {
        let config = GenerationConfig {
            max_retries: 9,
            ..GenerationConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_retries, 2);
        assert_eq!(RetryPolicy::default().max_retries, 2);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let gen = ScriptedGenerator::new(vec![
            Err(GenerationError::RateLimited { retry_after: None }),
            Err(server_error()),
            Ok("Sales are up.".to_string()),
        ]);
        let outcome = generate_with_retry(&gen, &request(), fast_policy()).await;
        assert_eq!(
            outcome,
            RetryOutcome::Success {
                text: "Sales are up.".to_string(),
                attempts: 3
            }
        );
        assert_eq!(gen.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_two_retries() {
        let gen = ScriptedGenerator::new(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
            Ok("never reached".to_string()),
        ]);
        let outcome = generate_with_retry(&gen, &request(), fast_policy()).await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(gen.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_stops_immediately() {
        let gen = ScriptedGenerator::new(vec![
            Err(GenerationError::Rejected {
                status: 401,
                body: "bad key".to_string(),
            }),
            Ok("never reached".to_string()),
        ]);
        let outcome = generate_with_retry(&gen, &request(), fast_policy()).await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(gen.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_generator_fails() {
        let outcome = generate_with_retry(&DisabledGenerator, &request(), fast_policy()).await;
        match outcome {
            RetryOutcome::Exhausted { last_error, .. } => {
                assert_eq!(last_error, GenerationError::Disabled)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " Revenue grew. " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Revenue grew.");
        assert!(parse_chat_response(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_openai_body_prepends_system_prompt() {
        let gen = OpenAiGenerator::new(&GenerationConfig::default(), "sk-test".to_string());
        let body = gen.body(&request());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "How are we doing?");
        assert_eq!(body["model"], "gpt-4o-mini");
    }
}
