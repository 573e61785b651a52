//! A uniform completion client over the three common wire shapes (OpenAI,
//! Anthropic, Gemini). Streaming token delivery is a non-goal (spec.md §1);
//! every provider call resolves to a single `complete()` response.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::utils::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system" | "user" | "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>, options: CompletionOptions) -> Result<String, CoreError>;
}

pub fn build_llm_client(config: &LlmConfig) -> Box<dyn LlmClient> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .unwrap_or_else(|_| Client::new());

    match config.provider.as_str() {
        "anthropic" => Box::new(AnthropicClient { client, config: config.clone() }),
        "gemini" => Box::new(GeminiClient { client, config: config.clone() }),
        _ => Box::new(OpenAiClient { client, config: config.clone() }),
    }
}

// --- OpenAI-shaped: POST {base_url}/v1/chat/completions ---------------------

struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: Vec<ChatMessage>, options: CompletionOptions) -> Result<String, CoreError> {
        let request = OpenAiRequest {
            model: &self.config.model,
            messages: &messages,
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: options.temperature.unwrap_or(0.2),
        };

        let mut builder = self.client.post(format!("{}/v1/chat/completions", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::LlmFailed(format!("{}: {}", status, body)));
        }

        let parsed: OpenAiResponse = response.json().await.map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::LlmFailed("empty choices in completion response".into()))
    }
}

// --- Anthropic-shaped: POST {base_url}/v1/messages, system is a top-level field --

struct AnthropicClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
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
    text: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: Vec<ChatMessage>, options: CompletionOptions) -> Result<String, CoreError> {
        let system = messages.iter().find(|m| m.role == "system").map(|m| m.content.as_str());
        let turns: Vec<AnthropicMessage> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| AnthropicMessage { role: &m.role, content: &m.content })
            .collect();

        let request = AnthropicRequest {
            model: &self.config.model,
            system,
            messages: turns,
            max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: options.temperature.unwrap_or(0.2),
        };

        let mut builder = self.client.post(format!("{}/v1/messages", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder = builder.header("anthropic-version", "2023-06-01");

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::LlmFailed(format!("{}: {}", status, body)));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        parsed
            .content
            .into_iter()
            .next()
            .map(|b| b.text)
            .ok_or_else(|| CoreError::LlmFailed("empty content blocks in completion response".into()))
    }
}

// --- Gemini-shaped: POST {base_url}/v1beta/models/{model}:generateContent, no system role --

struct GeminiClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: String,
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, messages: Vec<ChatMessage>, options: CompletionOptions) -> Result<String, CoreError> {
        // Gemini has no system role; fold it into the first user turn
        // (spec.md §4.6's "system-role-to-first-user-message adaptation").
        let system_preamble = messages.iter().find(|m| m.role == "system").map(|m| m.content.as_str());
        let mut first_user_seen = false;

        let contents: Vec<GeminiContent> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                let text = if role == "user" && !first_user_seen && system_preamble.is_some() {
                    first_user_seen = true;
                    // safe: checked is_some() above
                    return GeminiContent {
                        role,
                        parts: vec![
                            GeminiPart { text: system_preamble.unwrap() },
                            GeminiPart { text: &m.content },
                        ],
                    };
                } else {
                    &m.content
                };
                GeminiContent { role, parts: vec![GeminiPart { text }] }
            })
            .collect();

        let request = GeminiRequest {
            contents,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
                temperature: options.temperature.unwrap_or(0.2),
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url,
            self.config.model,
            self.config.api_key.as_deref().unwrap_or("")
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::LlmFailed(format!("{}: {}", status, body)));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        debug!(candidates = parsed.candidates.len(), "gemini completion received");

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| CoreError::LlmFailed("empty candidates in completion response".into()))
    }
}
