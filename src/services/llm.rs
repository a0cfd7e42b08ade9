use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;

use crate::core::config::Config;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini", "ollama" or "openai"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Model used for script writing only. Falls back to the provider model.
    #[serde(default)]
    pub script_model: Option<String>,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Ask the provider for a JSON body.
    pub json_output: bool,
    pub temperature: Option<f32>,
    /// JSON Schema (lowercase `type` names) the reply must follow. Providers
    /// that support structured output enforce it; the rest only see JSON mode.
    pub response_schema: Option<Value>,
}

impl ChatOptions {
    pub fn json() -> Self {
        Self {
            json_output: true,
            ..Self::default()
        }
    }

    pub fn json_with_schema(schema: Value) -> Self {
        Self {
            json_output: true,
            response_schema: Some(schema),
            ..Self::default()
        }
    }

    pub fn creative(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String>;
}

/// Builds the configured client, wrapped in retry. `model_override` replaces
/// the provider's model, which is how the script engine gets its own model.
pub fn create_llm(config: &Config, model_override: Option<&str>) -> Result<Box<dyn LlmClient>> {
    let inner: Box<dyn LlmClient> = match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            let model = model_override.unwrap_or(&cfg.model);
            Box::new(GeminiClient::new(&cfg.api_key, model))
        }
        "ollama" => {
            let cfg = config.llm.ollama.as_ref().context("Ollama config missing")?;
            let model = model_override.unwrap_or(&cfg.model);
            Box::new(OllamaClient::new(&cfg.base_url, model))
        }
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            let model = model_override.unwrap_or(&cfg.model);
            Box::new(OpenAIClient::new(&cfg.api_key, model, cfg.base_url.as_deref()))
        }
        _ => return Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    };

    Ok(Box::new(RetryingLlm::new(
        inner,
        config.llm.retry_count,
        Duration::from_secs(config.llm.retry_delay_seconds),
    )))
}

// --- Retry ---

/// Retries failed transport calls. The pipeline itself never retries.
#[derive(Debug)]
pub struct RetryingLlm {
    inner: Box<dyn LlmClient>,
    retry_count: usize,
    delay: Duration,
}

impl RetryingLlm {
    pub fn new(inner: Box<dyn LlmClient>, retry_count: usize, delay: Duration) -> Self {
        Self {
            inner,
            retry_count,
            delay,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlm {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(system, user, options).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    log::warn!(
                        "LLM call failed ({:#}), retrying {}/{} in {:?}",
                        e,
                        attempt,
                        self.retry_count,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!("LLM call failed after {} attempts", attempt + 1)))
                }
            }
        }
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> Result<url::Url> {
        let base = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        url::Url::parse_with_params(&base, &[("key", self.api_key.as_str())])
            .context("Invalid Gemini endpoint")
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Default)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl GeminiGenerationConfig {
    fn from_options(options: &ChatOptions) -> Option<Self> {
        if !options.json_output && options.temperature.is_none() {
            return None;
        }
        Some(Self {
            response_mime_type: options
                .json_output
                .then(|| "application/json".to_string()),
            response_schema: options.response_schema.as_ref().map(gemini_schema),
            temperature: options.temperature,
        })
    }
}

/// Gemini's schema dialect spells types in upper case (`OBJECT`, `STRING`).
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn extract_gemini_text(response_text: &str) -> Result<String> {
    let result: GeminiResponse = match serde_json::from_str(response_text) {
        Ok(r) => r,
        Err(e) => {
            return Err(anyhow!(
                "Failed to parse Gemini response: {}. Body: {}",
                e,
                response_text
            ))
        }
    };

    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    if let Some(candidates) = result.candidates {
        if let Some(first) = candidates.first() {
            if let Some(content) = &first.content {
                // Long answers can be split across several parts.
                let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
                if !text.is_empty() {
                    return Ok(text);
                }
            }

            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
    }

    Err(anyhow!(
        "Gemini response format unexpected or empty. Body: {}",
        response_text
    ))
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = self.endpoint()?;

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            }),
            generation_config: GeminiGenerationConfig::from_options(options),
        };

        let resp = self.client.post(url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        extract_gemini_text(&response_text)
    }
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

/// Ollama takes either `"json"` or a full JSON Schema in `format`.
fn ollama_format(options: &ChatOptions) -> Option<Value> {
    match &options.response_schema {
        Some(schema) => Some(schema.clone()),
        None => options.json_output.then(|| Value::String("json".to_string())),
    }
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
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
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: false,
            format: ollama_format(options),
            options: options
                .temperature
                .map(|temperature| OllamaOptions { temperature }),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
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

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            response_format: options.json_output.then(|| OpenAIResponseFormat {
                kind: "json_object".to_string(),
            }),
            temperature: options.temperature,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}
