use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, ProviderConfig};
use crate::error::ProviderError;
use crate::models::{ContentType, ProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const TEMPERATURE: f32 = 0.7;

/// One LLM vendor. Implementations make exactly one HTTP call per `generate`;
/// retries and failover belong to the provider manager.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, content_type: ContentType) -> Result<String, ProviderError>;
}

/// Builds an adapter for every provider that has an API key.
pub fn build_providers(config: &Config) -> Result<Vec<Arc<dyn LlmProvider>>, ProviderError> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    for kind in ProviderKind::ALL {
        let settings = config.provider(kind);
        if settings.api_key.is_none() {
            tracing::info!("{} API key not set; provider disabled", kind);
            continue;
        }

        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(settings, config.provider_timeout)?),
            ProviderKind::Claude => Arc::new(ClaudeProvider::new(settings, config.provider_timeout)?),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings, config.provider_timeout)?),
        };
        tracing::info!("{} provider enabled (model {})", kind, provider.model());
        providers.push(provider);
    }

    Ok(providers)
}

/// Shared HTTP plumbing for the three adapters.
struct VendorClient {
    kind: ProviderKind,
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl VendorClient {
    fn new(kind: ProviderKind, settings: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: kind,
                reason: "API key must not be empty".to_string(),
            })?;
        if settings.model.trim().is_empty() {
            return Err(ProviderError::NotConfigured {
                provider: kind,
                reason: "model name must not be empty".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ProviderError::http(kind, source))?;

        Ok(Self {
            kind,
            client,
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ProviderError> {
        let response = request
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|source| self.transport_error(source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| self.transport_error(source))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.kind,
                status: status.as_u16(),
                message: vendor_error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| {
            tracing::debug!("{} returned an unexpected body: {}", self.kind, err);
            ProviderError::EmptyResponse { provider: self.kind }
        })
    }

    fn transport_error(&self, source: reqwest::Error) -> ProviderError {
        if source.is_timeout() {
            ProviderError::Timeout {
                provider: self.kind,
                timeout: self.timeout,
            }
        } else {
            ProviderError::http(self.kind, source)
        }
    }

    fn non_empty(&self, text: Option<String>) -> Result<String, ProviderError> {
        text.filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse { provider: self.kind })
    }
}

/// Pulls `error.message` out of a vendor error body, falling back to the raw body.
fn vendor_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
    });

    match message {
        Some(message) => message.to_string(),
        None if body.trim().is_empty() => "empty error body".to_string(),
        None => body.chars().take(500).collect(),
    }
}

pub struct OpenAiProvider {
    inner: VendorClient,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: VendorClient::new(ProviderKind::OpenAi, settings, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.inner.model
    }

    async fn generate(&self, prompt: &str, content_type: ContentType) -> Result<String, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.inner.model,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: prompt,
            }],
            max_tokens: content_type.max_tokens(),
            temperature: TEMPERATURE,
        };

        let request = self
            .inner
            .client
            .post(format!("{}/chat/completions", self.inner.base_url))
            .bearer_auth(&self.inner.api_key)
            .json(&body);

        let parsed: ChatCompletionResponse = self.inner.send(request).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content);
        self.inner.non_empty(text)
    }
}

pub struct ClaudeProvider {
    inner: VendorClient,
}

impl ClaudeProvider {
    pub fn new(settings: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: VendorClient::new(ProviderKind::Claude, settings, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessageRequest<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model(&self) -> &str {
        &self.inner.model
    }

    async fn generate(&self, prompt: &str, content_type: ContentType) -> Result<String, ProviderError> {
        let body = MessagesRequest {
            model: &self.inner.model,
            max_tokens: content_type.max_tokens(),
            temperature: TEMPERATURE,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: prompt,
            }],
        };

        let request = self
            .inner
            .client
            .post(format!("{}/v1/messages", self.inner.base_url))
            .header("x-api-key", &self.inner.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let parsed: MessagesResponse = self.inner.send(request).await?;
        let text = parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text);
        self.inner.non_empty(text)
    }
}

pub struct GeminiProvider {
    inner: VendorClient,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            inner: VendorClient::new(ProviderKind::Gemini, settings, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.inner.model
    }

    async fn generate(&self, prompt: &str, content_type: ContentType) -> Result<String, ProviderError> {
        let body = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: content_type.max_tokens(),
                temperature: TEMPERATURE,
            },
        };

        let request = self
            .inner
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.inner.base_url, self.inner.model
            ))
            .query(&[("key", self.inner.api_key.as_str())])
            .json(&body);

        let parsed: GeminiResponse = self.inner.send(request).await?;
        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(ProviderError::EmptyResponse {
                provider: ProviderKind::Gemini,
            });
        };

        if let Some(reason @ ("SAFETY" | "RECITATION" | "MAX_TOKENS")) = candidate.finish_reason.as_deref() {
            tracing::warn!("gemini finished with reason {}", reason);
        }

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        self.inner.non_empty(Some(text))
    }
}
