//! Text Generation Clients
//!
//! `TextGenerator` is the seam between the workflow and whatever model
//! produces text. Two implementations:
//! - `ClaudeClient`: Anthropic Messages API with prompt caching on the system block
//! - `OllamaClient`: local Llama via Ollama `/api/generate`

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anything that turns a system prompt plus a user prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Short name for logs
    fn name(&self) -> &str;
}

// ============================================================================
// Claude
// ============================================================================

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
}

/// System message block with cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: String,
    text: String,
    cache_control: CacheControl,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    #[serde(default)]
    cache_read_input_tokens: usize,
}

impl ClaudeClient {
    /// `model` is a hint (haiku, sonnet, opus) or a full model id
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: Self::model_id(model).to_string(),
        })
    }

    /// Resolve a model hint to a model id
    pub fn model_id(model: &str) -> &str {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022",
            "sonnet" => "claude-sonnet-4-20250514",
            "opus" => "claude-opus-4-20250514",
            _ => model,
        }
    }
}

#[async_trait]
impl TextGenerator for ClaudeClient {
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: vec![SystemBlock {
                r#type: "text".to_string(),
                text: system.to_string(),
                cache_control: CacheControl {
                    r#type: "ephemeral".to_string(),
                },
            }],
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!("Calling Claude API: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Claude API")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let result: MessageResponse = response
            .json()
            .await
            .context("Failed to parse Claude response")?;

        let content = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        info!(
            "Claude response: model={}, in={}, out={}, cache_read={}",
            self.model,
            result.usage.input_tokens,
            result.usage.output_tokens,
            result.usage.cache_read_input_tokens
        );

        Ok(content)
    }

    fn name(&self) -> &str {
        "claude"
    }
}

// ============================================================================
// Ollama
// ============================================================================

/// Local Llama via Ollama
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "system": system,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": 0.1,
                    "num_predict": max_tokens,
                }
            }))
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama error {}: {}", status, body);
        }

        let result: OllamaGenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        debug!("Ollama response: model={}, len={}", self.model, result.response.len());
        Ok(result.response.trim().to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
