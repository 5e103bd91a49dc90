use crate::error::GenerationError;
use crate::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub const SYSTEM_PROMPT: &str =
    "You are a careful research assistant. Ground every statement in the provided context.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: prompt.into(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ChatUsage> for TokenUsage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl OpenAiChatModel {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GenerationError::Provider {
                provider: "openai".to_string(),
                details: format!("failed to build http client: {error}"),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            timeout,
        })
    }

    fn failure(&self, details: impl Into<String>) -> GenerationError {
        GenerationError::Provider {
            provider: self.provider().to_string(),
            details: details.into(),
        }
    }
}

fn completion_from(response: ChatResponse) -> Result<Generation, GenerationError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(GenerationError::EmptyCompletion)?;

    Ok(Generation {
        text,
        usage: response.usage.map(TokenUsage::from).unwrap_or_default(),
    })
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| self.failure("OPENAI_API_KEY is not set"))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            max_tokens = request.max_tokens,
            "sending chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            })
            .send()
            .await
            .map_err(|error| {
                error!(provider = "openai", %error, "chat completion request failed");
                if error.is_timeout() {
                    GenerationError::Timeout(self.timeout.as_secs())
                } else {
                    self.failure(format!("request failed: {error}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = "openai", %status, "chat completion API error");
            return Err(self.failure(format!("API returned {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await.map_err(|error| {
            if error.is_timeout() {
                GenerationError::Timeout(self.timeout.as_secs())
            } else {
                self.failure(format!("failed to parse response: {error}"))
            }
        })?;

        completion_from(parsed)
    }
}
