use async_trait::async_trait;
use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::error::{AppError, AppResult};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// An empty `system` prompt is not sent at all.
    async fn chat(&self, system: &str, user: &str) -> AppResult<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Fallback credential when none has been saved through the app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2000
}

pub fn create_llm(config: &LlmConfig, api_key: &str) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "deepseek" | "openai" => {
            let fallback = if config.provider == "deepseek" {
                DEEPSEEK_BASE_URL
            } else {
                OPENAI_BASE_URL
            };
            let base_url = checked_base_url(config.base_url.as_deref().unwrap_or(fallback))?;
            Ok(Arc::new(OpenAIClient::new(api_key, config, base_url)))
        }
        "ollama" => {
            let base_url = checked_base_url(config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL))?;
            Ok(Arc::new(OllamaClient::new(base_url, config)))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

fn checked_base_url(base_url: &str) -> Result<&str> {
    url::Url::parse(base_url).with_context(|| format!("Invalid LLM base_url: {}", base_url))?;
    Ok(base_url)
}

/// Local providers run without a credential.
pub fn requires_api_key(config: &LlmConfig) -> bool {
    config.provider != "ollama"
}

async fn upstream_error(resp: reqwest::Response) -> AppError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    AppError::Upstream { status, message }
}

// --- OpenAI compatible (DeepSeek, OpenAI) ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, config: &LlmConfig, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn messages(system: &str, user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system.trim().is_empty() {
        messages.push(ChatMessage { role: "system".to_string(), content: system.to_string() });
    }
    messages.push(ChatMessage { role: "user".to_string(), content: user.to_string() });
    messages
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: messages(system, user),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!("POST {} (model {})", url, self.model);

        let resp = self.client.post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }

        let result: OpenAIResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ResponseFormat(format!("invalid completion body: {}", e)))?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Upstream {
                status: 200,
                message: "completion contained no content".to_string(),
            })
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, config: &LlmConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system: &str, user: &str) -> AppResult<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: messages(system, user),
            stream: false,
            options: OllamaOptions { temperature: self.temperature },
        };
        debug!("POST {} (model {})", url, self.model);

        let resp = self.client.post(&url)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(upstream_error(resp).await);
        }

        let result: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ResponseFormat(format!("invalid chat body: {}", e)))?;
        if result.message.content.trim().is_empty() {
            return Err(AppError::Upstream {
                status: 200,
                message: "chat response contained no content".to_string(),
            });
        }
        Ok(result.message.content)
    }
}
