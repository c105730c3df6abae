use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Every failure the gateway can surface.
///
/// The enum is `Clone` because one upstream fetch result is broadcast to all
/// callers waiting on the same cache key.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Invalid flags or environment at startup. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} timed out")]
    UpstreamTimeout(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded { limit: u64, retry_after_secs: u64 },

    /// Cache miss, no usable stale entry, and the fetch failed.
    #[error("catalog unavailable: {0}")]
    CacheUnrecoverable(String),

    #[error("csrf validation failed: {0}")]
    CsrfRejected(&'static str),

    #[error("unauthorized")]
    Unauthorized,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamUnavailable(_) | GatewayError::CacheUnrecoverable(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CsrfRejected(_) => StatusCode::FORBIDDEN,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CacheUnrecoverable(_) => "CACHE_UNRECOVERABLE",
            GatewayError::CsrfRejected(_) => "CSRF_REJECTED",
            GatewayError::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::UpstreamUnavailable(format!("redis: {err}"))
    }
}

impl From<deadpool_redis::PoolError> for GatewayError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        GatewayError::UpstreamUnavailable(format!("redis pool: {err}"))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        if let GatewayError::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_response_carries_retry_after() {
        let response = GatewayError::RateLimitExceeded {
            limit: 100,
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn upstream_errors_map_to_gateway_statuses() {
        assert_eq!(
            GatewayError::UpstreamTimeout("catalog fetch".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::CacheUnrecoverable("boom".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
