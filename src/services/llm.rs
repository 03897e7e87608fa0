use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::state::Language;
use crate::services::stream::{fragments, split_lines, TextStream};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "ollama" or "openai"
    #[serde(default = "default_ollama")]
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: default_ollama(),
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// Any server speaking the OpenAI chat-completions dialect (LM Studio,
/// llama.cpp server, vLLM, ...).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_ollama() -> Option<OllamaConfig> {
    Some(OllamaConfig {
        base_url: default_ollama_url(),
        timeout_seconds: default_timeout(),
    })
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: &str, system: &str, user: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: Role::System, content: system.to_string() },
                ChatMessage { role: Role::User, content: user.to_string() },
            ],
            temperature,
        }
    }

    pub fn system(&self) -> &str {
        self.content_of(Role::System)
    }

    pub fn user(&self) -> &str {
        self.content_of(Role::User)
    }

    fn content_of(&self, role: Role) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Common system prompt shape shared by every agent.
pub fn system_prompt(language: Language, role: &str, instructions: &str) -> String {
    match language {
        Language::Indonesian => format!(
            "Kamu adalah seorang {} yang expert. Kamu harus menghasilkan output berkualitas tinggi. {}",
            role, instructions
        ),
        Language::English => format!(
            "You are an expert {}. You must produce high-quality output. {}",
            role, instructions
        ),
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, request: &ChatRequest) -> Result<String>;

    /// Streams the reply as text fragments. Clients without native
    /// streaming yield the whole reply as a single fragment.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let text = self.chat(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// Model names installed on the server, if it can list them.
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "ollama" => {
            let cfg = config.llm.ollama.as_ref().context("Ollama config missing")?;
            Ok(Box::new(OllamaClient::new(&cfg.base_url, cfg.timeout_seconds)?))
        }
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(
                &cfg.base_url,
                cfg.api_key.as_deref(),
                cfg.timeout_seconds,
            )?))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

fn http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .context("Failed to build HTTP client")
}

// --- Ollama ---

#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout_seconds)?,
        })
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
            options: OllamaOptions { temperature: request.temperature },
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error ({}): {}", status, error_text));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
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
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessageResponse>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Deserialize)]
struct OllamaTag {
    name: String,
}

fn parse_ollama_chunk(line: &str) -> Result<Option<String>> {
    let chunk: OllamaStreamChunk = serde_json::from_str(line)
        .with_context(|| format!("Malformed Ollama stream chunk: {}", line))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Ollama stream error: {}", error));
    }
    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let resp = self.post_chat(request, false).await?;
        let result: OllamaResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        Ok(result.message.content)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let resp = self.post_chat(request, true).await?;
        Ok(fragments(split_lines(resp.bytes_stream()), parse_ollama_chunk))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Failed to list Ollama models: {}", resp.status()));
        }
        let tags: OllamaTags = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

// --- OpenAI-compatible ---

#[derive(Debug)]
pub struct OpenAIClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            api_key: api_key.map(str::to_string),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout_seconds)?,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream,
        };

        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error ({}): {}", status, error_text));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIResponse {
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

#[derive(Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIModels {
    #[serde(default)]
    data: Vec<OpenAIModel>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

fn parse_openai_event(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        // comments, `event:` and `id:` lines carry no text
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }
    let chunk: OpenAIStreamChunk = serde_json::from_str(data)
        .with_context(|| format!("Malformed OpenAI stream chunk: {}", data))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let resp = self.post_chat(request, false).await?;
        let result: OpenAIResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        if let Some(choice) = result.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                return Ok(content);
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let resp = self.post_chat(request, true).await?;
        Ok(fragments(split_lines(resp.bytes_stream()), parse_openai_event))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let resp = self.authorized(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", resp.status()));
        }
        let models: OpenAIModels = resp.json().await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_request_shape() {
        let request = ChatRequest::new("gemma3:latest", "sys", "hi", 0.3);
        let body = OllamaRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            options: OllamaOptions { temperature: request.temperature },
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gemma3:latest");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!((json["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ollama_response_parsing_success() {
        let json = r#"{
            "model": "gemma3:latest",
            "created_at": "2024-01-01T00:00:00Z",
            "message": { "role": "assistant", "content": "Hello world" },
            "done": true
        }"#;
        let result: OllamaResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.message.content, "Hello world");
    }

    #[test]
    fn test_ollama_stream_chunks() {
        let chunk = r#"{"model":"m","message":{"role":"assistant","content":"Once"},"done":false}"#;
        assert_eq!(parse_ollama_chunk(chunk).unwrap().as_deref(), Some("Once"));

        let done = r#"{"model":"m","message":{"role":"assistant","content":""},"done":true,"eval_count":42}"#;
        assert_eq!(parse_ollama_chunk(done).unwrap(), None);

        let failed = r#"{"error":"model 'x' not found"}"#;
        assert!(parse_ollama_chunk(failed).is_err());
        assert!(parse_ollama_chunk("not json").is_err());
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hello there" },
                "finish_reason": "stop"
            }]
        }"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_openai_stream_events() {
        let event = r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_openai_event(event).unwrap().as_deref(), Some("Hel"));

        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_event(role_only).unwrap(), None);

        assert_eq!(parse_openai_event("data: [DONE]").unwrap(), None);
        assert_eq!(parse_openai_event(": keep-alive").unwrap(), None);
        assert!(parse_openai_event("data: {broken").is_err());
    }

    #[test]
    fn test_ollama_tags_parsing() {
        let json = r#"{"models":[{"name":"gemma3:latest","size":1},{"name":"qwen2.5:3b"}]}"#;
        let tags: OllamaTags = serde_json::from_str(json).unwrap();
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["gemma3:latest", "qwen2.5:3b"]);
    }

    #[test]
    fn test_create_llm_rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "gemini".to_string();
        assert!(create_llm(&config).is_err());

        config.llm.provider = "openai".to_string();
        assert!(create_llm(&config).is_err(), "openai section is required");
    }

    #[test]
    fn test_request_accessors() {
        let request = ChatRequest::new("m", "be brief", "write", 0.85);
        assert_eq!(request.system(), "be brief");
        assert_eq!(request.user(), "write");
    }

    #[test]
    fn test_system_prompt_follows_language() {
        let id = system_prompt(Language::Indonesian, "Book Planner", "Buat outline.");
        assert!(id.starts_with("Kamu adalah seorang Book Planner"));
        assert!(id.ends_with("Buat outline."));

        let en = system_prompt(Language::English, "Book Reviewer", "Be strict.");
        assert!(en.starts_with("You are an expert Book Reviewer."));
    }
}
