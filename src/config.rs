use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::models::ProviderKind;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub openai: ProviderConfig,
    pub claude: ProviderConfig,
    pub gemini: ProviderConfig,
    pub provider_timeout: Duration,
    pub fallback_order: Vec<ProviderKind>,
    pub success_cooldown: Duration,
    pub failure_cooldown: Duration,
    pub max_retries: u32,
    pub consistency_threshold: f64,
    pub chapter_pause: Duration,
    pub context_window_chars: usize,
    pub context_tail_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            openai: ProviderConfig {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
            },
            claude: ProviderConfig {
                api_key: None,
                model: "claude-3-5-sonnet-latest".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
            },
            gemini: ProviderConfig {
                api_key: None,
                model: "gemini-1.5-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            },
            provider_timeout: Duration::from_secs(60),
            fallback_order: ProviderKind::ALL.to_vec(),
            success_cooldown: Duration::from_millis(2_000),
            failure_cooldown: Duration::from_millis(10_000),
            max_retries: 3,
            consistency_threshold: 0.7,
            chapter_pause: Duration::from_millis(3_000),
            context_window_chars: 1500,
            context_tail_chars: 800,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = get("BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Some(port) = parse(&get, "PORT") {
            config.port = port;
        }

        config.openai.api_key = get("OPENAI_API_KEY");
        config.claude.api_key = get("ANTHROPIC_API_KEY").or_else(|| get("CLAUDE_API_KEY"));
        config.gemini.api_key = get("GEMINI_API_KEY");

        for (provider, prefix) in [
            (&mut config.openai, "OPENAI"),
            (&mut config.claude, "CLAUDE"),
            (&mut config.gemini, "GEMINI"),
        ] {
            if let Some(model) = get(&format!("{prefix}_MODEL")) {
                provider.model = model;
            }
            if let Some(url) = get(&format!("{prefix}_BASE_URL")) {
                provider.base_url = url.trim_end_matches('/').to_string();
            }
        }

        if let Some(secs) = parse::<u64, _>(&get, "PROVIDER_TIMEOUT_SECS") {
            config.provider_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(order) = get("PROVIDER_FALLBACK_ORDER") {
            match parse_fallback_order(&order) {
                Ok(parsed) => config.fallback_order = parsed,
                Err(err) => tracing::warn!("ignoring PROVIDER_FALLBACK_ORDER: {}", err),
            }
        }
        if let Some(ms) = parse(&get, "RATE_LIMIT_SUCCESS_COOLDOWN_MS") {
            config.success_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "RATE_LIMIT_FAILURE_COOLDOWN_MS") {
            config.failure_cooldown = Duration::from_millis(ms);
        }
        if let Some(retries) = parse(&get, "GENERATION_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(threshold) = parse::<f64, _>(&get, "CONSISTENCY_THRESHOLD") {
            config.consistency_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(ms) = parse(&get, "CHAPTER_PAUSE_MS") {
            config.chapter_pause = Duration::from_millis(ms);
        }
        if let Some(chars) = parse(&get, "BOOK_CONTEXT_WINDOW_CHARS") {
            config.context_window_chars = chars;
        }
        if let Some(chars) = parse(&get, "BOOK_CONTEXT_TAIL_CHARS") {
            config.context_tail_chars = chars;
        }

        config
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Claude => &self.claude,
            ProviderKind::Gemini => &self.gemini,
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }
}

fn parse<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid value `{}` for {}", raw, key);
            None
        }
    }
}

/// Parses a comma separated provider list, dropping duplicates.
fn parse_fallback_order(raw: &str) -> Result<Vec<ProviderKind>, String> {
    let mut order = Vec::new();
    for name in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let kind: ProviderKind = name.parse()?;
        if !order.contains(&kind) {
            order.push(kind);
        }
    }
    if order.is_empty() {
        return Err("no providers listed".to_string());
    }
    Ok(order)
}
