use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The LLM vendors the service knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Claude,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Claude, ProviderKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Chapter,
    Test,
    #[default]
    General,
}

impl ContentType {
    /// Reads a free-form request tag. Anything other than `chapter` or `test` is
    /// general content.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "chapter" => ContentType::Chapter,
            "test" => ContentType::Test,
            _ => ContentType::General,
        }
    }

    /// Output token budget requested from the vendor.
    pub fn max_tokens(&self) -> u32 {
        match self {
            ContentType::Chapter => 4000,
            ContentType::General => 1500,
            ContentType::Test => 100,
        }
    }

    /// (minimum, maximum) word counts used by the quality gate.
    pub fn word_bounds(&self) -> (usize, usize) {
        match self {
            ContentType::Chapter => (200, 6000),
            ContentType::General => (50, 3000),
            ContentType::Test => (1, 500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub content_type: ContentType,
    pub provider: Option<ProviderKind>,
    pub max_retries: u32,
    pub prior_content: Option<String>,
    pub require_consistency: bool,
}

impl GenerationRequest {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            content_type: ContentType::default(),
            provider: None,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            prior_content: None,
            require_consistency: false,
        }
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn provider(mut self, provider: Option<ProviderKind>) -> Self {
        self.provider = provider;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Require the output to stay consistent with `prior`.
    pub fn consistent_with(mut self, prior: impl Into<String>) -> Self {
        self.prior_content = Some(prior.into());
        self.require_consistency = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub content: String,
    pub provider: ProviderKind,
    pub quality_score: f64,
    pub consistency_score: Option<f64>,
    pub word_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    pub content: String,
    pub provider: Option<ProviderKind>,
    pub word_count: usize,
    pub quality_score: f64,
    pub consistency_score: Option<f64>,
    pub generated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Chapter {
    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSpec {
    pub title: String,
    pub genre: String,
    pub style: String,
    pub audience: String,
}

impl BookSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            genre: "fiction".to_string(),
            style: "engaging narrative".to_string(),
            audience: "general readers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterOutline {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

impl ChapterOutline {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: String::new(),
            key_points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub total_chapters: usize,
    pub successful_chapters: usize,
    pub total_words: usize,
    pub average_quality: f64,
    pub providers_used: Vec<ProviderKind>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub genre: String,
    pub style: String,
    pub audience: String,
    pub chapters: Vec<Chapter>,
    pub metadata: BookMetadata,
}

/// Point-in-time view of one provider, as reported by the status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: ProviderKind,
    pub configured: bool,
    pub available: bool,
    pub rate_limited: bool,
    pub cooldown_remaining_ms: u64,
    pub model: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProbe {
    pub provider: ProviderKind,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
