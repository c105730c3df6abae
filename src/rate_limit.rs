use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;

use crate::clock::Clock;
use crate::metrics::{RATE_LIMIT_DECISIONS, RATE_LIMIT_FALLBACK};
use crate::store::{CounterHit, CounterStore};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Api,
    Auth, // credential endpoints, tight quota
    Public,
}

impl PolicyKind {
    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Api => "api",
            PolicyKind::Auth => "auth",
            PolicyKind::Public => "public",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub kind: PolicyKind,
    pub window: Duration,
    pub max_requests: u64,
}

impl RateLimitPolicy {
    pub fn new(kind: PolicyKind, max_requests: u64, window: Duration) -> Self {
        Self {
            kind,
            window,
            max_requests,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    // hashed so raw client addresses never reach the shared store
    pub fn key_for(&self, identity: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}:{}", self.name(), &digest[..16])
    }
}

#[derive(Debug, Clone)]
pub struct Policies {
    pub api: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub public: RateLimitPolicy,
}

impl Policies {
    pub fn get(&self, kind: PolicyKind) -> &RateLimitPolicy {
        match kind {
            PolicyKind::Api => &self.api,
            PolicyKind::Auth => &self.auth,
            PolicyKind::Public => &self.public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    // end of the current window, epoch ms
    pub reset_at_ms: i64,
}

impl RateLimitDecision {
    pub fn reset_at_secs(&self) -> i64 {
        // round up so clients never retry before the window actually ends
        (self.reset_at_ms + 999).div_euclid(1000)
    }

    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let wait_ms = (self.reset_at_ms - now_ms).max(0) as u64;
        wait_ms.div_ceil(1000).max(1)
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at_secs()));
    }
}

// Rate limit record - one per key, reset when a new window starts
#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    window_start_ms: i64,
    window_ms: i64,
    count: u64,
}

impl RateLimitRecord {
    fn expired(&self, now_ms: i64) -> bool {
        now_ms >= self.window_start_ms + self.window_ms
    }
}

#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub prefix: String,
    pub store_timeout: Duration,
    // how long to stay on the fallback after the shared store failed
    pub store_retry: Duration,
    pub sweep_every: u64,
}

pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    local: DashMap<String, RateLimitRecord>,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
    // 0 while the shared store is healthy, otherwise when to probe it again
    store_retry_at_ms: AtomicI64,
    processed: AtomicU64,
}

impl RateLimiter {
    // store = None runs on the in-process map only
    pub fn new(
        store: Option<Arc<dyn CounterStore>>,
        clock: Arc<dyn Clock>,
        settings: LimiterSettings,
    ) -> Self {
        Self {
            store,
            local: DashMap::new(),
            clock,
            settings,
            store_retry_at_ms: AtomicI64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    pub fn store_degraded(&self) -> bool {
        self.store_retry_at_ms.load(Ordering::Acquire) != 0
    }

    pub async fn store_healthy(&self) -> Option<bool> {
        let store = self.store.as_ref()?;
        Some(
            timeout(self.settings.store_timeout, store.health_check())
                .await
                .unwrap_or(false),
        )
    }

    pub fn local_records(&self) -> usize {
        self.local.len()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Count one request for `key` and decide whether it is admitted.
    pub async fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let window_ms = policy.window_ms().max(1) as i64;
        let window_start = now - now.rem_euclid(window_ms);

        let decision = match self.check_shared(key, policy, window_start).await {
            Some(decision) => decision,
            None => {
                if self.store.is_some() {
                    RATE_LIMIT_FALLBACK.inc();
                }
                self.check_local(key, policy, window_start)
            }
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        RATE_LIMIT_DECISIONS
            .with_label_values(&[policy.name(), outcome])
            .inc();

        self.maybe_sweep(now);
        decision
    }

    // None when the shared store is absent, backing off, or failing.
    async fn check_shared(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        window_start: i64,
    ) -> Option<RateLimitDecision> {
        let store = self.store.as_ref()?;
        if !self.store_ready(store.as_ref()).await {
            return None;
        }

        let remote_key = format!("{}:rl:{}:{}", self.settings.prefix, key, window_start);
        let attempt = timeout(
            self.settings.store_timeout,
            store.increment_and_get(&remote_key, policy.window_ms(), policy.max_requests),
        )
        .await;

        match attempt {
            Ok(Ok(CounterHit { count, accepted })) => Some(RateLimitDecision {
                allowed: accepted,
                limit: policy.max_requests,
                remaining: if accepted {
                    policy.max_requests.saturating_sub(count)
                } else {
                    0
                },
                reset_at_ms: window_start + policy.window_ms() as i64,
            }),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Counter store failed, using in-process rate limiting");
                self.mark_store_failed();
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.store_timeout.as_millis() as u64,
                    "Counter store timed out, using in-process rate limiting"
                );
                self.mark_store_failed();
                None
            }
        }
    }

    // Request-driven recovery: once the back-off elapsed, exactly one caller
    // wins the CAS and probes the store; everyone else stays on the fallback.
    async fn store_ready(&self, store: &dyn CounterStore) -> bool {
        let retry_at = self.store_retry_at_ms.load(Ordering::Acquire);
        if retry_at == 0 {
            return true;
        }

        let now = self.clock.now_ms();
        if now < retry_at {
            return false;
        }

        let next_retry = now + self.settings.store_retry.as_millis() as i64;
        if self
            .store_retry_at_ms
            .compare_exchange(retry_at, next_retry, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let healthy = timeout(self.settings.store_timeout, store.health_check())
            .await
            .unwrap_or(false);
        if healthy {
            self.store_retry_at_ms.store(0, Ordering::Release);
            tracing::info!("Counter store recovered, resuming shared rate limiting");
        }
        healthy
    }

    fn mark_store_failed(&self) {
        let retry_at = self.clock.now_ms() + self.settings.store_retry.as_millis() as i64;
        self.store_retry_at_ms.store(retry_at.max(1), Ordering::Release);
    }

    // The DashMap entry guard holds the shard lock, so updates to one key are
    // serialized within this process.
    fn check_local(&self, key: &str, policy: &RateLimitPolicy, window_start: i64) -> RateLimitDecision {
        let window_ms = policy.window_ms() as i64;
        let mut record = self
            .local
            .entry(key.to_string())
            .or_insert(RateLimitRecord {
                window_start_ms: window_start,
                window_ms,
                count: 0,
            });

        // new window? Reset it
        if record.window_start_ms != window_start {
            record.window_start_ms = window_start;
            record.window_ms = window_ms;
            record.count = 0;
        }

        let allowed = record.count < policy.max_requests;
        if allowed {
            record.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(record.count),
            reset_at_ms: window_start + window_ms,
        }
    }

    fn maybe_sweep(&self, now: i64) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.settings.sweep_every == 0 || processed % self.settings.sweep_every != 0 {
            return;
        }
        self.sweep(now);
    }

    pub fn sweep(&self, now_ms: i64) -> usize {
        let before = self.local.len();
        self.local.retain(|_, record| !record.expired(now_ms));
        let removed = before.saturating_sub(self.local.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.local.len(), "Swept expired rate limit records");
        }
        removed
    }
}
