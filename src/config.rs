use clap::Parser;
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::error::GatewayError;
use crate::rate_limit::{LimiterSettings, Policies, PolicyKind, RateLimitPolicy};

// CLI argument structure; every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "confscout-gateway")]
#[command(about = "Rate limiting, read-through caching gateway for the conference catalog")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "CONFSCOUT_PORT", default_value_t = 8080)]
    pub port: u16,

    // Catalog service base url, "/conferences" is appended
    #[arg(short, long, env = "CONFSCOUT_UPSTREAM_URL", default_value = "http://localhost:3000/internal")]
    pub upstream_url: String,

    // Shared store for counters and cache; in-process only when absent
    #[arg(long, env = "CONFSCOUT_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "CONFSCOUT_REDIS_POOL_SIZE", default_value_t = 8)]
    pub redis_pool_size: usize,

    // Product prefix for every key in the shared store
    #[arg(long, env = "CONFSCOUT_KEY_PREFIX", default_value = "confscout")]
    pub key_prefix: String,

    // Bump whenever the cached payload shape changes
    #[arg(long, env = "CONFSCOUT_SCHEMA_VERSION", default_value_t = 1)]
    pub schema_version: u32,

    // Cache TTL in seconds
    #[arg(short, long, env = "CONFSCOUT_CACHE_TTL", default_value_t = 60)]
    pub cache_ttl: u64,

    // Age in seconds after which a cached catalog is never served
    #[arg(long, env = "CONFSCOUT_CACHE_MAX_STALENESS", default_value_t = 300)]
    pub cache_max_staleness: u64,

    #[arg(long, env = "CONFSCOUT_REVALIDATE_IN_BACKGROUND", default_value_t = true, action = clap::ArgAction::Set)]
    pub revalidate_in_background: bool,

    // How long a request waits for the catalog upstream
    #[arg(long, env = "CONFSCOUT_FETCH_TIMEOUT_MS", default_value_t = 3_000)]
    pub fetch_timeout_ms: u64,

    // Upper bound for a detached population fetch
    #[arg(long, env = "CONFSCOUT_FETCH_HARD_TIMEOUT_MS", default_value_t = 30_000)]
    pub fetch_hard_timeout_ms: u64,

    // Bound for every counter/cache store call
    #[arg(long, env = "CONFSCOUT_STORE_TIMEOUT_MS", default_value_t = 250)]
    pub store_timeout_ms: u64,

    // Seconds to stay on in-process counters after the shared store failed
    #[arg(long, env = "CONFSCOUT_STORE_RETRY_SECS", default_value_t = 30)]
    pub store_retry_secs: u64,

    #[arg(long, env = "CONFSCOUT_RATE_LIMIT_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub rate_limit_enabled: bool,

    // Rate limit max requests per window, per policy
    #[arg(long, env = "CONFSCOUT_API_LIMIT", default_value_t = 100)]
    pub api_limit: u64,

    #[arg(long, env = "CONFSCOUT_API_WINDOW", default_value_t = 60)]
    pub api_window: u64,

    #[arg(long, env = "CONFSCOUT_AUTH_LIMIT", default_value_t = 10)]
    pub auth_limit: u64,

    #[arg(long, env = "CONFSCOUT_AUTH_WINDOW", default_value_t = 900)]
    pub auth_window: u64,

    #[arg(long, env = "CONFSCOUT_PUBLIC_LIMIT", default_value_t = 300)]
    pub public_limit: u64,

    #[arg(long, env = "CONFSCOUT_PUBLIC_WINDOW", default_value_t = 60)]
    pub public_window: u64,

    // Sweep expired in-process records every N checks
    #[arg(long, env = "CONFSCOUT_SWEEP_EVERY", default_value_t = 100)]
    pub sweep_every: u64,

    // Number of trusted proxies appending to X-Forwarded-For; 0 uses the peer address
    #[arg(long, env = "CONFSCOUT_TRUSTED_PROXY_HOPS", default_value_t = 0)]
    pub trusted_proxy_hops: usize,

    // Marks the CSRF cookie Secure
    #[arg(long, env = "CONFSCOUT_PRODUCTION")]
    pub production: bool,

    #[arg(long, env = "CONFSCOUT_CSRF_MAX_AGE", default_value_t = 86_400)]
    pub csrf_max_age: u64,

    // Bearer token for the purge endpoint; purge is disabled without it
    #[arg(long, env = "CONFSCOUT_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    #[arg(long, env = "CONFSCOUT_LOG_JSON")]
    pub log_json: bool,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub upstream_url: String,
    pub redis_url: Option<String>,
    pub redis_pool_size: usize,
    pub rate_limit_enabled: bool,
    pub policies: Policies,
    pub limiter: LimiterSettings,
    pub cache: CacheSettings,
    pub trusted_proxy_hops: usize,
    pub production: bool,
    pub csrf_max_age: Duration,
    pub admin_token: Option<String>,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings, GatewayError> {
        let invalid = |msg: String| Err(GatewayError::Configuration(msg));

        if self.key_prefix.trim().is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return invalid(format!("key prefix {:?} must be a non-empty token", self.key_prefix));
        }
        if self.schema_version == 0 {
            return invalid("schema version starts at 1".to_string());
        }
        if self.cache_ttl == 0 {
            return invalid("cache ttl must be positive".to_string());
        }
        if self.cache_ttl > self.cache_max_staleness {
            return invalid(format!(
                "cache ttl ({}s) exceeds max staleness ({}s)",
                self.cache_ttl, self.cache_max_staleness
            ));
        }
        if self.fetch_timeout_ms == 0 || self.store_timeout_ms == 0 {
            return invalid("timeouts must be positive".to_string());
        }
        if self.fetch_hard_timeout_ms < self.fetch_timeout_ms {
            return invalid(format!(
                "fetch hard timeout ({}ms) is shorter than fetch timeout ({}ms)",
                self.fetch_hard_timeout_ms, self.fetch_timeout_ms
            ));
        }
        if self.redis_pool_size == 0 {
            return invalid("redis pool size must be positive".to_string());
        }
        if matches!(&self.admin_token, Some(token) if token.len() < 16) {
            return invalid("admin token must be at least 16 characters".to_string());
        }

        let policies = Policies {
            api: policy(PolicyKind::Api, self.api_limit, self.api_window)?,
            auth: policy(PolicyKind::Auth, self.auth_limit, self.auth_window)?,
            public: policy(PolicyKind::Public, self.public_limit, self.public_window)?,
        };

        let store_timeout = Duration::from_millis(self.store_timeout_ms);

        Ok(Settings {
            port: self.port,
            upstream_url: self.upstream_url,
            redis_url: self.redis_url.filter(|url| !url.trim().is_empty()),
            redis_pool_size: self.redis_pool_size,
            rate_limit_enabled: self.rate_limit_enabled,
            policies,
            limiter: LimiterSettings {
                prefix: self.key_prefix.clone(),
                store_timeout,
                store_retry: Duration::from_secs(self.store_retry_secs),
                sweep_every: self.sweep_every,
            },
            cache: CacheSettings {
                namespace: self.key_prefix,
                schema_version: self.schema_version,
                ttl: Duration::from_secs(self.cache_ttl),
                max_staleness: Duration::from_secs(self.cache_max_staleness),
                fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
                fetch_hard_timeout: Duration::from_millis(self.fetch_hard_timeout_ms),
                store_timeout,
                revalidate_in_background: self.revalidate_in_background,
            },
            trusted_proxy_hops: self.trusted_proxy_hops,
            production: self.production,
            csrf_max_age: Duration::from_secs(self.csrf_max_age),
            admin_token: self.admin_token,
        })
    }
}

fn policy(kind: PolicyKind, max_requests: u64, window_secs: u64) -> Result<RateLimitPolicy, GatewayError> {
    if max_requests == 0 || window_secs == 0 {
        return Err(GatewayError::Configuration(format!(
            "{} policy needs a positive limit and window (got {max_requests} per {window_secs}s)",
            kind.name()
        )));
    }
    Ok(RateLimitPolicy::new(kind, max_requests, Duration::from_secs(window_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["confscout-gateway"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_are_valid() {
        let settings = args(&[]).into_settings().unwrap();
        assert_eq!(settings.policies.api.max_requests, 100);
        assert_eq!(settings.policies.auth.window, Duration::from_secs(900));
        assert_eq!(settings.cache.ttl, Duration::from_secs(60));
        assert_eq!(settings.cache.max_staleness, Duration::from_secs(300));
        assert!(settings.cache.revalidate_in_background);
        assert!(settings.redis_url.is_none());
    }

    #[test]
    fn ttl_longer_than_staleness_is_rejected() {
        let err = args(&["--cache-ttl", "600"]).into_settings().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn zero_quota_is_rejected() {
        let err = args(&["--auth-limit", "0"]).into_settings().unwrap_err();
        assert!(err.to_string().contains("auth policy"));
    }

    #[test]
    fn bool_flags_take_explicit_values() {
        let settings = args(&["--revalidate-in-background", "false", "--production"])
            .into_settings()
            .unwrap();
        assert!(!settings.cache.revalidate_in_background);
        assert!(settings.production);
    }

    #[test]
    fn short_admin_token_is_rejected() {
        assert!(args(&["--admin-token", "short"]).into_settings().is_err());
    }
}
