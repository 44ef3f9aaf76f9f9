//! OpenAI-compatible chat completions client for challenge generation

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::clients::traits::{GenerationClient, GenerationError, GenerationParams};
use crate::error::{ProofAndFitError, Result};
use crate::prompts::SYSTEM_PROMPT;
use crate::schemas::{CandidateItem, challenge_response_schema, parse_candidate};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_ms: u64,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
}

impl OpenAiChatClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ProofAndFitError::Config {
                message: format!("Failed to build reqwest client with timeout: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout_ms,
            limiter: None,
        })
    }

    /// Cap outgoing calls per minute; zero disables the limit
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.limiter =
            NonZeroU32::new(rpm).map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationClient for OpenAiChatClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<CandidateItem, GenerationError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!(
            "Requesting challenge (model={}, temperature={:.2}, prompt_chars={})",
            self.model,
            params.temperature,
            prompt.len()
        );

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "assessment_challenge",
                    "schema": challenge_response_schema(),
                }
            }),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    GenerationError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream(format!(
                "{} {}",
                status,
                truncate_snippet(error_text.trim(), 300)
            )));
        }

        let val: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(format!("unreadable response: {}", e)))?;
        let content = extract_message_content(&val).ok_or_else(|| {
            GenerationError::Malformed("response has no message content".to_string())
        })?;
        parse_candidate(content)
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

fn extract_message_content(val: &Value) -> Option<&str> {
    val.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
}

pub(crate) fn truncate_snippet(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let cut: String = input.chars().take(max).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice_content() {
        let val = json!({"choices": [{"message": {"content": "{\"title\": \"T\"}"}}]});
        assert_eq!(extract_message_content(&val), Some("{\"title\": \"T\"}"));
        assert_eq!(extract_message_content(&json!({"choices": []})), None);
        let blank = json!({"choices": [{"message": {"content": "  "}}]});
        assert_eq!(extract_message_content(&blank), None);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = OpenAiChatClient::new(
            "sk-test".into(),
            "gpt-4o-mini".into(),
            Some("http://localhost:9000/v1/".into()),
            1_000,
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9000/v1/chat/completions");
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn truncate_snippet_is_char_safe() {
        assert_eq!(truncate_snippet("héllo", 2), "hé...");
        assert_eq!(truncate_snippet("ok", 5), "ok");
    }
}
