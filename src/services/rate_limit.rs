use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::ProviderKind;

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    last_call: Instant,
    cooldown: Duration,
    last_used: DateTime<Utc>,
}

impl RateLimitEntry {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_call);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }
}

/// Per-provider cooldowns. A provider is limited while less than its cooldown has
/// elapsed since the last recorded call. Callers take a provider with
/// [`RateLimiter::try_reserve`], which checks and claims it under one write lock, so
/// concurrent requests never both call a provider that is cooling down.
pub struct RateLimiter {
    entries: RwLock<HashMap<ProviderKind, RateLimitEntry>>,
    success_cooldown: Duration,
    failure_cooldown: Duration,
}

impl RateLimiter {
    pub fn new(success_cooldown: Duration, failure_cooldown: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            success_cooldown,
            failure_cooldown,
        }
    }

    #[cfg(test)]
    pub async fn is_rate_limited(&self, provider: ProviderKind) -> bool {
        self.cooldown_remaining(provider).await.is_some()
    }

    pub async fn cooldown_remaining(&self, provider: ProviderKind) -> Option<Duration> {
        let entries = self.entries.read().await;
        entries
            .get(&provider)
            .and_then(|entry| entry.remaining(Instant::now()))
    }

    /// Claims `provider` for an outgoing call, holding it for `hold` until the call
    /// is recorded. Returns the remaining cooldown if the provider is not free.
    pub async fn try_reserve(&self, provider: ProviderKind, hold: Duration) -> Result<(), Duration> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if let Some(remaining) = entries.get(&provider).and_then(|entry| entry.remaining(now)) {
            return Err(remaining);
        }
        entries.insert(
            provider,
            RateLimitEntry {
                last_call: now,
                cooldown: hold,
                last_used: Utc::now(),
            },
        );
        Ok(())
    }

    pub async fn last_used(&self, provider: ProviderKind) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(&provider).map(|e| e.last_used)
    }

    pub async fn record_success(&self, provider: ProviderKind) {
        self.record(provider, self.success_cooldown).await;
    }

    pub async fn record_failure(&self, provider: ProviderKind) {
        self.record(provider, self.failure_cooldown).await;
    }

    async fn record(&self, provider: ProviderKind, cooldown: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            provider,
            RateLimitEntry {
                last_call: Instant::now(),
                cooldown,
                last_used: Utc::now(),
            },
        );
    }
}
