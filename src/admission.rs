//! Per-request entry point: classify, rate limit, then hand over to the route.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::error::GatewayError;
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::rate_limit::PolicyKind;
use crate::state::AppState;

// Credential endpoints, handled by the auth service behind this gateway
const AUTH_PREFIXES: &[&str] = &["/api/auth"];

// Anonymous, cacheable reads
const PUBLIC_PREFIXES: &[&str] = &["/api/conferences", "/health", "/metrics"];

/// Pick exactly one policy for a path: auth beats public beats the api default.
pub fn classify(path: &str) -> PolicyKind {
    if AUTH_PREFIXES.iter().any(|prefix| matches_prefix(path, prefix)) {
        PolicyKind::Auth
    } else if PUBLIC_PREFIXES.iter().any(|prefix| matches_prefix(path, prefix)) {
        PolicyKind::Public
    } else {
        PolicyKind::Api
    }
}

// "/api/auth" matches "/api/auth" and "/api/auth/login", not "/api/authors"
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Client identity used for rate limiting.
///
/// With `trusted_hops = n`, the n-th X-Forwarded-For entry from the right is
/// the address our outermost trusted proxy saw. Entries further left are
/// written by the client and are ignored. Without trusted hops, or when the
/// chain is shorter than expected, the socket peer is used.
pub fn client_identity(request: &Request, trusted_hops: usize) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    if trusted_hops > 0 {
        let chain: Vec<&str> = request
            .headers()
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();

        if chain.len() >= trusted_hops {
            let candidate = chain[chain.len() - trusted_hops];
            if candidate.parse::<std::net::IpAddr>().is_ok() {
                return candidate.to_string();
            }
        }
    }

    peer.unwrap_or_else(|| "unknown".to_string())
}

/// Admission middleware.
///
/// Rate limit headers go on every response, allowed or denied. Denied
/// requests never reach the handler.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    REQUEST_TOTAL.inc();
    let start_time = Instant::now();

    if !state.settings.rate_limit_enabled {
        let response = next.run(request).await;
        REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
        return response;
    }

    let kind = classify(request.uri().path());
    let policy = state.settings.policies.get(kind);
    let identity = client_identity(&request, state.settings.trusted_proxy_hops);
    let key = policy.key_for(&identity);

    let decision = state.limiter.check(&key, policy).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        let retry_after_secs = decision.retry_after_secs(state.limiter.now_ms());
        tracing::debug!(
            policy = policy.name(),
            key = %key,
            retry_after_secs,
            "Rate limit exceeded"
        );
        GatewayError::RateLimitExceeded {
            limit: decision.limit,
            retry_after_secs,
        }
        .into_response()
    };

    decision.apply_headers(response.headers_mut());
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}
