use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{GenerationError, ProviderError};
use crate::models::{ContentType, GenerationRequest, GenerationResult, ProviderKind, ProviderProbe, ProviderStatus};
use crate::services::consistency;
use crate::services::llm::{self, LlmProvider};
use crate::services::quality::{HeuristicValidator, QualityScorer};
use crate::services::rate_limit::RateLimiter;

const PROBE_PROMPT: &str = "Reply with a short greeting.";

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub fallback_order: Vec<ProviderKind>,
    pub call_timeout: Duration,
    pub consistency_threshold: f64,
    pub success_cooldown: Duration,
    pub failure_cooldown: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fallback_order: config.fallback_order.clone(),
            call_timeout: config.provider_timeout,
            consistency_threshold: config.consistency_threshold,
            success_cooldown: config.success_cooldown,
            failure_cooldown: config.failure_cooldown,
        }
    }
}

/// Routes generation requests across providers with cooldowns, quality and
/// consistency gates.
pub struct ProviderManager {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
    rate_limiter: RateLimiter,
    scorer: Box<dyn QualityScorer>,
    settings: ManagerSettings,
}

impl ProviderManager {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            providers: HashMap::new(),
            rate_limiter: RateLimiter::new(settings.success_cooldown, settings.failure_cooldown),
            scorer: Box::new(HeuristicValidator),
            settings,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut manager = Self::new(ManagerSettings::from_config(config));
        for provider in llm::build_providers(config)? {
            manager = manager.with_provider(provider);
        }
        if manager.providers.is_empty() {
            tracing::warn!("no AI providers configured; generation requests will fail");
        }
        for kind in ProviderKind::ALL {
            if manager.providers.contains_key(&kind) && !manager.settings.fallback_order.contains(&kind) {
                tracing::warn!("{} is configured but missing from the fallback order; trying it last", kind);
            }
        }
        Ok(manager)
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    #[cfg(test)]
    pub fn with_scorer(mut self, scorer: Box<dyn QualityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    #[cfg(test)]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn configured_count(&self) -> usize {
        self.providers.len()
    }

    /// Preferred provider first, then the fallback order, then any configured provider
    /// the fallback order left out. Duplicates and unconfigured providers are dropped.
    pub fn candidate_order(&self, preferred: Option<ProviderKind>) -> Vec<ProviderKind> {
        let mut order = Vec::with_capacity(ProviderKind::ALL.len());
        let listed = preferred
            .into_iter()
            .chain(self.settings.fallback_order.iter().copied())
            .chain(ProviderKind::ALL);
        for kind in listed {
            if self.providers.contains_key(&kind) && !order.contains(&kind) {
                order.push(kind);
            }
        }
        order
    }

    /// Tries each candidate once. Gate failures (quality, consistency) move on to the
    /// next candidate while fewer than `max_retries` gate failures have happened; the
    /// same provider is never asked twice within one request.
    pub async fn generate_content(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let candidates = self.candidate_order(request.provider);
        if let Some(preferred) = request.provider {
            if !candidates.contains(&preferred) {
                tracing::warn!("preferred provider {} is not configured", preferred);
            }
        }

        let prior = request
            .prior_content
            .as_deref()
            .filter(|p| request.require_consistency && !p.trim().is_empty());

        let mut attempted = 0;
        let mut gate_failures = 0;
        let mut last_error = None;
        let mut last_skip = None;

        for kind in candidates {
            let Some(provider) = self.providers.get(&kind) else {
                continue;
            };

            if let Err(remaining) = self.rate_limiter.try_reserve(kind, self.settings.call_timeout).await {
                tracing::debug!("skipping {}: cooling down for {:?}", kind, remaining);
                last_skip = Some(GenerationError::RateLimited { provider: kind, remaining });
                continue;
            }

            attempted += 1;
            tracing::info!("generating {:?} content with {}", request.content_type, kind);
            let content = match self.call(provider.as_ref(), &request.prompt, request.content_type).await {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("{} failed: {}", kind, err);
                    self.rate_limiter.record_failure(kind).await;
                    last_error = Some(err.into());
                    continue;
                }
            };

            let report = self.scorer.validate(&content, request.content_type);
            let gate_error = if !report.passes {
                Some(GenerationError::QualityGate {
                    provider: kind,
                    score: report.score,
                    reason: report.reason.clone(),
                })
            } else {
                None
            };

            let consistency_score = prior.map(|prior| consistency::score(&content, prior));
            let gate_error = gate_error.or_else(|| {
                consistency_score
                    .filter(|score| *score < self.settings.consistency_threshold)
                    .map(|score| GenerationError::ConsistencyGate {
                        provider: kind,
                        score,
                        threshold: self.settings.consistency_threshold,
                    })
            });

            // The vendor call itself succeeded, so the provider gets the short cooldown
            // whether or not the output clears the gates.
            self.rate_limiter.record_success(kind).await;

            if let Some(err) = gate_error {
                tracing::warn!("{}", err);
                gate_failures += 1;
                last_error = Some(err);
                if gate_failures < request.max_retries {
                    continue;
                }
                tracing::warn!("gate retry budget of {} exhausted", request.max_retries);
                break;
            }

            tracing::info!(
                "{} produced {} words (quality {:.2})",
                kind,
                report.word_count,
                report.score
            );
            return Ok(GenerationResult {
                content,
                provider: kind,
                quality_score: report.score,
                consistency_score,
                word_count: report.word_count,
                timestamp: Utc::now(),
            });
        }

        // A real call failure says more than a cooldown skip.
        let last = last_error
            .or(last_skip)
            .unwrap_or(GenerationError::NoProvidersConfigured);
        tracing::error!("all providers failed: {}", last);
        Err(GenerationError::AllProvidersExhausted {
            attempted,
            last: Box::new(last),
        })
    }

    async fn call(
        &self,
        provider: &dyn LlmProvider,
        prompt: &str,
        content_type: ContentType,
    ) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.settings.call_timeout, provider.generate(prompt, content_type)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.kind(),
                timeout: self.settings.call_timeout,
            }),
        }
    }

    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::with_capacity(ProviderKind::ALL.len());
        let order = self
            .settings
            .fallback_order
            .iter()
            .copied()
            .chain(ProviderKind::ALL)
            .fold(Vec::new(), |mut acc, kind| {
                if !acc.contains(&kind) {
                    acc.push(kind);
                }
                acc
            });

        for kind in order {
            let provider = self.providers.get(&kind);
            let remaining = self.rate_limiter.cooldown_remaining(kind).await;
            statuses.push(ProviderStatus {
                name: kind,
                configured: provider.is_some(),
                available: provider.is_some() && remaining.is_none(),
                rate_limited: remaining.is_some(),
                cooldown_remaining_ms: remaining.map_or(0, |d| d.as_millis() as u64),
                model: provider.map(|p| p.model().to_string()),
                last_used: self.rate_limiter.last_used(kind).await,
            });
        }
        statuses
    }

    /// Sends a short prompt straight to every configured provider, ignoring
    /// cooldowns and gates.
    pub async fn test_providers(&self) -> Vec<ProviderProbe> {
        let mut probes = Vec::new();
        for kind in self.candidate_order(None) {
            let Some(provider) = self.providers.get(&kind) else {
                continue;
            };
            let started = Instant::now();
            let outcome = self.call(provider.as_ref(), PROBE_PROMPT, ContentType::Test).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            if let Err(err) = &outcome {
                tracing::warn!("probe of {} failed: {}", kind, err);
            }
            probes.push(ProviderProbe {
                provider: kind,
                success: outcome.is_ok(),
                latency_ms,
                error: outcome.err().map(|e| e.to_string()),
            });
        }
        probes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quality::QualityReport;
    use crate::services::testing::{ScriptedProvider, fast_settings, sample_chapter};

    fn manager_with(providers: &[Arc<ScriptedProvider>]) -> ProviderManager {
        providers.iter().fold(ProviderManager::new(fast_settings()), |m, p| {
            m.with_provider(p.clone())
        })
    }

    #[test]
    fn candidates_start_with_preferred_and_skip_unconfigured() {
        let claude = ScriptedProvider::always(ProviderKind::Claude, "ok");
        let gemini = ScriptedProvider::always(ProviderKind::Gemini, "ok");
        let manager = manager_with(&[claude, gemini]);

        assert_eq!(
            manager.candidate_order(Some(ProviderKind::Gemini)),
            vec![ProviderKind::Gemini, ProviderKind::Claude]
        );
        assert_eq!(
            manager.candidate_order(Some(ProviderKind::OpenAi)),
            vec![ProviderKind::Claude, ProviderKind::Gemini]
        );
    }

    #[test]
    fn providers_left_out_of_the_fallback_order_are_tried_last() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "ok");
        let claude = ScriptedProvider::always(ProviderKind::Claude, "ok");
        let settings = ManagerSettings {
            fallback_order: vec![ProviderKind::Claude],
            ..fast_settings()
        };
        let manager = ProviderManager::new(settings).with_provider(openai).with_provider(claude);

        assert_eq!(
            manager.candidate_order(None),
            vec![ProviderKind::Claude, ProviderKind::OpenAi]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_past_limited_and_failing_providers() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "unused");
        let claude = ScriptedProvider::failing(ProviderKind::Claude, "upstream down");
        let gemini = ScriptedProvider::always(ProviderKind::Gemini, "Hello there.");
        let manager = manager_with(&[openai.clone(), claude.clone(), gemini.clone()]);

        manager.rate_limiter().record_failure(ProviderKind::OpenAi).await;

        let request = GenerationRequest::new("Say hi").content_type(ContentType::Test);
        let result = manager.generate_content(&request).await.unwrap();

        assert_eq!(result.provider, ProviderKind::Gemini);
        assert_eq!(result.content, "Hello there.");
        assert_eq!(openai.calls(), 0);
        assert_eq!(claude.calls(), 1);
        assert_eq!(gemini.calls(), 1);
        assert!(manager.rate_limiter().is_rate_limited(ProviderKind::Claude).await);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_the_last_error() {
        let openai = ScriptedProvider::failing(ProviderKind::OpenAi, "bad key");
        let claude = ScriptedProvider::failing(ProviderKind::Claude, "overloaded");
        let manager = manager_with(&[openai, claude]);

        let err = manager
            .generate_content(&GenerationRequest::new("x").content_type(ContentType::Test))
            .await
            .unwrap_err();
        match err {
            GenerationError::AllProvidersExhausted { attempted, last } => {
                assert_eq!(attempted, 2);
                assert!(last.to_string().contains("overloaded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_error_outranks_a_later_cooldown_skip() {
        let openai = ScriptedProvider::failing(ProviderKind::OpenAi, "quota exceeded");
        let gemini = ScriptedProvider::always(ProviderKind::Gemini, "unused");
        let manager = manager_with(&[openai, gemini.clone()]);
        manager.rate_limiter().record_failure(ProviderKind::Gemini).await;

        let err = manager
            .generate_content(&GenerationRequest::new("x").content_type(ContentType::Test))
            .await
            .unwrap_err();
        match err {
            GenerationError::AllProvidersExhausted { attempted, last } => {
                assert_eq!(attempted, 1);
                assert!(last.to_string().contains("quota exceeded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_cooldown_skips_report_rate_limited() {
        let claude = ScriptedProvider::always(ProviderKind::Claude, "unused");
        let manager = manager_with(&[claude]);
        manager.rate_limiter().record_failure(ProviderKind::Claude).await;

        let err = manager.generate_content(&GenerationRequest::new("x")).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::AllProvidersExhausted { attempted: 0, ref last }
                if matches!(**last, GenerationError::RateLimited { provider: ProviderKind::Claude, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_do_not_share_a_provider_call() {
        let openai = ScriptedProvider::slow(ProviderKind::OpenAi, "Hello there.", Duration::from_secs(1));
        let manager = manager_with(&[openai.clone()]);
        let request = GenerationRequest::new("Say hi").content_type(ContentType::Test);

        let (first, second) = tokio::join!(
            manager.generate_content(&request),
            manager.generate_content(&request)
        );

        assert_eq!(openai.calls(), 1);
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let err = first.err().or(second.err()).unwrap();
        assert!(matches!(
            err,
            GenerationError::AllProvidersExhausted { ref last, .. }
                if matches!(**last, GenerationError::RateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_providers_means_no_providers_configured() {
        let manager = ProviderManager::new(fast_settings());
        let err = manager.generate_content(&GenerationRequest::new("x")).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::AllProvidersExhausted { attempted: 0, ref last }
                if matches!(**last, GenerationError::NoProvidersConfigured)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn quality_failure_advances_to_next_provider() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "too short");
        let claude = ScriptedProvider::always(ProviderKind::Claude, &sample_chapter("forest"));
        let manager = manager_with(&[openai.clone(), claude.clone()]);

        let request = GenerationRequest::new("chapter").content_type(ContentType::Chapter);
        let result = manager.generate_content(&request).await.unwrap();

        assert_eq!(result.provider, ProviderKind::Claude);
        assert_eq!(openai.calls(), 1);
        assert!(result.quality_score >= 0.6);
        assert!(result.consistency_score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_budget_stops_the_candidate_walk() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "short");
        let claude = ScriptedProvider::always(ProviderKind::Claude, "short");
        let gemini = ScriptedProvider::always(ProviderKind::Gemini, &sample_chapter("forest"));
        let manager = manager_with(&[openai.clone(), claude.clone(), gemini.clone()]);

        let request = GenerationRequest::new("chapter")
            .content_type(ContentType::Chapter)
            .max_retries(2);
        let err = manager.generate_content(&request).await.unwrap_err();

        assert!(matches!(
            err,
            GenerationError::AllProvidersExhausted { ref last, .. }
                if matches!(**last, GenerationError::QualityGate { provider: ProviderKind::Claude, .. })
        ));
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consistency_gate_rejects_divergent_output() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, &sample_chapter("desert"));
        let claude = ScriptedProvider::always(ProviderKind::Claude, &sample_chapter("harbor"));
        let manager = manager_with(&[openai.clone(), claude.clone()]);

        let prior = sample_chapter("harbor");
        let request = GenerationRequest::new("next chapter")
            .content_type(ContentType::Chapter)
            .consistent_with(prior);
        let result = manager.generate_content(&request).await.unwrap();

        assert_eq!(openai.calls(), 1);
        assert_eq!(result.provider, ProviderKind::Claude);
        assert_eq!(result.consistency_score, Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_prior_content_skips_consistency() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, &sample_chapter("desert"));
        let manager = manager_with(&[openai]);

        let request = GenerationRequest::new("first chapter")
            .content_type(ContentType::Chapter)
            .consistent_with("   ");
        let result = manager.generate_content(&request).await.unwrap();
        assert!(result.consistency_score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_and_fails_over() {
        let openai = ScriptedProvider::slow(ProviderKind::OpenAi, "late", Duration::from_secs(120));
        let gemini = ScriptedProvider::always(ProviderKind::Gemini, "on time");
        let manager = manager_with(&[openai.clone(), gemini]);

        let result = manager
            .generate_content(&GenerationRequest::new("hi").content_type(ContentType::Test))
            .await
            .unwrap();
        assert_eq!(result.provider, ProviderKind::Gemini);
        assert!(manager.rate_limiter().is_rate_limited(ProviderKind::OpenAi).await);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_configuration_and_cooldowns() {
        let claude = ScriptedProvider::always(ProviderKind::Claude, "ok");
        let manager = manager_with(&[claude]);
        manager.rate_limiter().record_failure(ProviderKind::Claude).await;

        let statuses = manager.provider_status().await;
        assert_eq!(statuses.len(), 3);

        let claude = statuses.iter().find(|s| s.name == ProviderKind::Claude).unwrap();
        assert!(claude.configured);
        assert!(claude.rate_limited);
        assert!(!claude.available);
        assert!(claude.last_used.is_some());

        let openai = statuses.iter().find(|s| s.name == ProviderKind::OpenAi).unwrap();
        assert!(!openai.configured);
        assert!(!openai.available);
    }

    struct AcceptAll;

    impl QualityScorer for AcceptAll {
        fn validate(&self, content: &str, _content_type: ContentType) -> QualityReport {
            QualityReport {
                passes: true,
                score: 1.0,
                word_count: content.split_whitespace().count(),
                reason: "accepted".to_string(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_scorer_replaces_heuristics() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "two words");
        let manager = manager_with(&[openai]).with_scorer(Box::new(AcceptAll));

        let result = manager
            .generate_content(&GenerationRequest::new("chapter").content_type(ContentType::Chapter))
            .await
            .unwrap();
        assert_eq!(result.quality_score, 1.0);
        assert_eq!(result.word_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_ignore_cooldowns() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, "hello");
        let claude = ScriptedProvider::failing(ProviderKind::Claude, "nope");
        let manager = manager_with(&[openai, claude]);
        manager.rate_limiter().record_failure(ProviderKind::OpenAi).await;

        let probes = manager.test_providers().await;
        assert_eq!(probes.len(), 2);
        assert!(probes[0].success);
        assert!(!probes[1].success);
        assert!(probes[1].error.as_deref().unwrap().contains("nope"));
    }
}
