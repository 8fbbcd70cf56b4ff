//! LLM API Providers
//!
//! Concrete clients for OpenAI, Anthropic, and OpenAI-compatible local servers.

use super::*;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ConfigError;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY_CHARS: usize = 500;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Local => "local",
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl LLMConfig {
    /// First configured provider, in order OpenAI, Anthropic, local.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(config) = Self::openai_from_env()? {
            return Ok(config);
        }
        if let Some(config) = Self::anthropic_from_env()? {
            return Ok(config);
        }
        if let Some(config) = Self::local_from_env()? {
            return Ok(config);
        }
        Err(ConfigError::NoProviderConfigured)
    }

    /// Load one specific provider from the environment.
    pub fn provider_from_env(provider: Provider) -> Result<Self, ConfigError> {
        let config = match provider {
            Provider::OpenAI => Self::openai_from_env()?,
            Provider::Anthropic => Self::anthropic_from_env()?,
            Provider::Local => Self::local_from_env()?,
        };
        config.ok_or_else(|| {
            ConfigError::Invalid(match provider {
                Provider::OpenAI => "OPENAI_API_KEY is not set".to_string(),
                Provider::Anthropic => "ANTHROPIC_API_KEY is not set".to_string(),
                Provider::Local => "LOCAL_LLM_URL is not set".to_string(),
            })
        })
    }

    fn openai_from_env() -> Result<Option<Self>, ConfigError> {
        Ok(env_nonempty("OPENAI_API_KEY").map(|key| Self {
            provider: Provider::OpenAI,
            api_key: key,
            model: env_nonempty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: env_nonempty("OPENAI_BASE_URL"),
            timeout_secs: 60,
        }))
    }

    fn anthropic_from_env() -> Result<Option<Self>, ConfigError> {
        Ok(env_nonempty("ANTHROPIC_API_KEY").map(|key| Self {
            provider: Provider::Anthropic,
            api_key: key,
            model: env_nonempty("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            base_url: env_nonempty("ANTHROPIC_BASE_URL"),
            timeout_secs: 60,
        }))
    }

    fn local_from_env() -> Result<Option<Self>, ConfigError> {
        let Some(url) = env_nonempty("LOCAL_LLM_URL") else {
            return Ok(None);
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "LOCAL_LLM_URL must be an http(s) URL (got `{url}`)"
            )));
        }
        Ok(Some(Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: env_nonempty("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string()),
            base_url: Some(url),
            timeout_secs: 120,
        }))
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}

fn openai_messages(request: &CompletionRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

/// `Retry-After` in seconds, as milliseconds; 60s when absent or unparseable.
fn retry_after_ms(header: Option<&str>) -> u64 {
    header
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        .saturating_mul(1000)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok());
        return Err(LLMError::RateLimited {
            retry_after_ms: retry_after_ms(header),
        });
    }
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let error_text: String = error_text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return Err(LLMError::Api(format!("HTTP {}: {error_text}", status.as_u16())));
    }
    Ok(response)
}

fn network_error(e: reqwest::Error) -> LLMError {
    LLMError::Network(e.to_string())
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAIClient {
    client: Client,
    config: LLMConfig,
}

impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{base}/chat/completions");

        let mut body = json!({
            "model": self.config.model,
            "messages": openai_messages(request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if request.json_schema.is_some() {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let data: Value = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
            .to_string();
        let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    config: LLMConfig,
}

impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{base}/v1/messages");

        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(1200),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let data: Value = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content: String = data["content"]
            .as_array()
            .ok_or_else(|| LLMError::InvalidResponse("missing content array".to_string()))?
            .iter()
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

pub struct LocalClient {
    client: Client,
    config: LLMConfig,
}

impl LocalClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        if config.base_url.is_none() {
            return Err(ConfigError::Invalid("local provider needs a base URL".to_string()));
        }
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LLMError::Api("No base URL configured".to_string()))?
            .trim_end_matches('/');

        // OpenAI-compatible API (vLLM, llama.cpp server, Ollama in OpenAI mode).
        let url = format!("{base_url}/v1/chat/completions");

        let mut body = json!({
            "model": self.config.model,
            "messages": openai_messages(request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let data: Value = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Dispatches to the configured provider.
pub enum UnifiedClient {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: LLMConfig) -> Result<Self, ConfigError> {
        Ok(match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAIClient::new(config)?),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(config)?),
            Provider::Local => Self::Local(LocalClient::new(config)?),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(LLMConfig::from_env()?)
    }

    fn config(&self) -> &LLMConfig {
        match self {
            Self::OpenAI(c) => &c.config,
            Self::Anthropic(c) => &c.config,
            Self::Local(c) => &c.config,
        }
    }
}

#[async_trait]
impl LLMProvider for UnifiedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            Self::OpenAI(c) => c.complete(request).await,
            Self::Anthropic(c) => c.complete(request).await,
            Self::Local(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        let config = self.config();
        ModelInfo {
            name: config.model.clone(),
            provider: config.provider,
            supports_json_mode: config.provider == Provider::OpenAI,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
