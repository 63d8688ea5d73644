//! LLM integration via an OpenAI-compatible endpoint (OpenRouter).
//! Distinguishes "the model did not answer" (timeout / unavailable) from
//! "the model answered badly" (handled one level up during parsing).

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::LlmConfig;

pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("llm provider unavailable: {0}")]
    Unavailable(String),

    #[error("llm returned no usable completion: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
}

/// Seam for the synthesis step; implemented by [`OpenRouterClient`] and
/// by test doubles.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;

    fn model(&self) -> &str;
}

pub struct OpenRouterClient {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
    max_retries: u32,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig, api_key: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(OPENROUTER_API_BASE);

        Self {
            client: OpenAIClient::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
            max_retries: config.max_retries.max(1),
        }
    }

    async fn request_once(&self, prompt: &str) -> Result<Completion, LlmError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("request build failed: {e}")))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.temperature)
            .messages([message.into()])
            .build()
            .map_err(|e| LlmError::Unavailable(format!("request build failed: {e}")))?;

        match timeout(
            Duration::from_secs(self.timeout_seconds),
            self.client.chat().create(request),
        )
        .await
        {
            Ok(Ok(response)) => {
                let content = response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .filter(|content| !content.trim().is_empty())
                    .ok_or_else(|| LlmError::InvalidResponse("empty completion".to_string()))?;

                Ok(Completion {
                    content,
                    model: self.model.clone(),
                })
            }
            Ok(Err(e)) => Err(LlmError::Unavailable(e.to_string())),
            Err(_) => Err(LlmError::Timeout {
                timeout_seconds: self.timeout_seconds,
            }),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        info!(
            "Requesting completion from '{}' (prompt length: {} chars)",
            self.model,
            prompt.len()
        );

        let mut last_error = LlmError::Unavailable("no attempt made".to_string());
        for attempt in 1..=self.max_retries {
            match self.request_once(prompt).await {
                Ok(completion) => {
                    info!(
                        "Received {} chars from '{}'",
                        completion.content.len(),
                        completion.model
                    );
                    return Ok(completion);
                }
                // An answered-but-empty response won't improve on retry
                Err(e @ LlmError::InvalidResponse(_)) => return Err(e),
                Err(e) => {
                    warn!("LLM attempt {}/{} failed: {}", attempt, self.max_retries, e);
                    last_error = e;
                }
            }

            if attempt < self.max_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
