use anyhow::{anyhow, Result};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::config::{LLMConfig, ProviderConfig};

pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DASHSCOPE_MODEL: &str = "qwen-turbo";
pub const MOONSHOT_BASE_URL: &str = "https://api.moonshot.cn/v1";
pub const MOONSHOT_MODEL: &str = "moonshot-v1-128k";
pub const MOONSHOT_CACHE_MODEL: &str = "moonshot-v1";
pub const CACHE_TTL_SECONDS: u64 = 300;

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

fn build_messages(system_message: Option<&str>, prompt: &str) -> Vec<LLMMessage> {
    let mut messages = Vec::new();
    if let Some(sys_msg) = system_message {
        messages.push(LLMMessage::new("system", sys_msg));
    }
    messages.push(LLMMessage::new("user", prompt));
    messages
}

fn require_key<'a>(key: &'a Option<String>, env_name: &str) -> Result<&'a str> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("{} is not configured", env_name))
}

async fn error_body(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    error!(
        provider = provider,
        status = %status,
        error = %error_text,
        "LLM API request failed"
    );
    anyhow!("{} API request failed ({}): {}", provider, status, error_text)
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    DashScope(DashScopeProvider),
    Moonshot(MoonshotProvider),
}

impl LLMProvider {
    /// Make a request to the LLM provider with optional system message
    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        match self {
            LLMProvider::DashScope(provider) => provider.make_request(system_message, prompt).await,
            LLMProvider::Moonshot(provider) => provider.make_request(system_message, prompt).await,
        }
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::DashScope(provider) => provider.provider_name(),
            LLMProvider::Moonshot(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::DashScope(provider) => provider.model_name(),
            LLMProvider::Moonshot(provider) => provider.model_name(),
        }
    }
}

/// Alibaba DashScope (Qwen) text generation
#[derive(Debug, Clone)]
pub struct DashScopeProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct DashScopeRequest {
    model: String,
    input: DashScopeInput,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
struct DashScopeInput {
    messages: Vec<LLMMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct DashScopeResponse {
    output: DashScopeOutput,
}

#[derive(Debug, Clone, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    text: Option<String>,
}

impl DashScopeProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DASHSCOPE_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DASHSCOPE_MODEL.to_string()),
        }
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        let api_key = require_key(&self.api_key, "DASHSCOPE_API_KEY")?;

        let request_body = DashScopeRequest {
            model: self.model.clone(),
            input: DashScopeInput {
                messages: build_messages(system_message, prompt),
            },
            parameters: Value::Object(Default::default()),
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/services/aigc/text-generation/generation", self.base_url))
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(self.provider_name(), response).await);
        }

        let body: DashScopeResponse = response.json().await?;
        let text = body
            .output
            .text
            .ok_or_else(|| anyhow!("No text in DashScope response"))?;

        info!(
            provider = self.provider_name(),
            response_length = text.len(),
            "Successfully received LLM response"
        );
        Ok(text)
    }

    pub fn provider_name(&self) -> &'static str {
        "DashScope"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Moonshot (Kimi): OpenAI-compatible chat plus file extraction and context caching
#[derive(Debug, Clone)]
pub struct MoonshotProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct CacheRequest<'a> {
    model: &'a str,
    messages: &'a [LLMMessage],
    ttl: u64,
    tags: Vec<&'a str>,
}

impl MoonshotProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| MOONSHOT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| MOONSHOT_MODEL.to_string()),
        }
    }

    fn api_key(&self) -> Result<&str> {
        require_key(&self.api_key, "MOONSHOT_API_KEY")
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        self.chat(&build_messages(system_message, prompt)).await
    }

    /// Chat completion over an arbitrary message list (may include cache references).
    pub async fn chat(&self, messages: &[LLMMessage]) -> Result<String> {
        let api_key = self.api_key()?;

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            message_count = messages.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(self.provider_name(), response).await);
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No choices in Moonshot response"))?
            .message
            .content
            .unwrap_or_default();

        info!(
            provider = self.provider_name(),
            response_length = content.len(),
            "Successfully received LLM response"
        );
        Ok(content)
    }

    /// Upload a document for server-side text extraction; returns the file id.
    pub async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let api_key = self.api_key()?;
        let size = bytes.len();

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(file_name.to_string()))
            .text("purpose", "file-extract");

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(self.provider_name(), response).await);
        }

        let file: FileObject = response.json().await?;
        info!(
            provider = self.provider_name(),
            file_id = %file.id,
            file_name = %file_name,
            size_bytes = size,
            "Uploaded file for extraction"
        );
        Ok(file.id)
    }

    /// Raw body of the extracted-content endpoint.
    pub async fn file_content(&self, file_id: &str) -> Result<String> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(format!("{}/files/{}/content", self.base_url, file_id))
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(self.provider_name(), response).await);
        }

        Ok(response.text().await?)
    }

    /// Extracted plain text of an uploaded file.
    pub async fn extract_text(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let file_id = self.upload_file(file_name, bytes).await?;
        let body = self.file_content(&file_id).await?;
        Ok(extracted_text(&body))
    }

    /// Cache `messages` under `tag` and return the message that references the cache.
    pub async fn create_cache(&self, messages: &[LLMMessage], tag: &str) -> Result<LLMMessage> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .post(format!("{}/caching", self.base_url))
            .bearer_auth(api_key)
            .json(&CacheRequest {
                model: MOONSHOT_CACHE_MODEL,
                messages,
                ttl: CACHE_TTL_SECONDS,
                tags: vec![tag],
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(self.provider_name(), response).await);
        }

        info!(provider = self.provider_name(), tag = %tag, "Created context cache");
        Ok(LLMMessage::new(
            "cache",
            format!("tag={};reset_ttl={}", tag, CACHE_TTL_SECONDS),
        ))
    }

    pub fn provider_name(&self) -> &'static str {
        "Moonshot"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// The content endpoint answers with a JSON envelope holding `content`;
/// anything else is taken as the text itself.
pub fn extracted_text(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    DashScope,
    Moonshot,
}

impl LLMProviderFactory {
    /// Create the provider selected for plain generation and quiz analysis
    pub fn create_provider(config: &LLMConfig) -> LLMProvider {
        match config.provider {
            LLMProviderType::DashScope => {
                LLMProvider::DashScope(Self::dashscope(&config.dashscope))
            }
            LLMProviderType::Moonshot => LLMProvider::Moonshot(Self::moonshot(&config.moonshot)),
        }
    }

    pub fn dashscope(config: &ProviderConfig) -> DashScopeProvider {
        DashScopeProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.model.clone(),
        )
    }

    pub fn moonshot(config: &ProviderConfig) -> MoonshotProvider {
        MoonshotProvider::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.model.clone(),
        )
    }
}
