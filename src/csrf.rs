//! Double-submit CSRF tokens.
//!
//! The token lives in a cookie the page script can read (not HttpOnly) and
//! must be echoed back in a header on every state-changing request. A
//! cross-site form can send the cookie but cannot read it to fill the header.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::state::AppState;

pub const CSRF_COOKIE: &str = "confscout_csrf";
pub const CSRF_HEADER: &str = "x-csrf-token";

const TOKEN_BYTES: usize = 32;

/// Token attached to the request by [`csrf_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Constant-time comparison for secrets of equal length.
pub fn tokens_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn requires_validation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Check the cookie/header pair of a state-changing request.
pub fn validate(headers: &HeaderMap) -> Result<(), GatewayError> {
    let jar = CookieJar::from_headers(headers);
    let cookie = jar
        .get(CSRF_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .ok_or(GatewayError::CsrfRejected("missing token cookie"))?;
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(GatewayError::CsrfRejected("missing token header"))?;

    if !is_well_formed(&cookie) || !is_well_formed(header) {
        return Err(GatewayError::CsrfRejected("malformed token"));
    }
    if !tokens_match(&cookie, header) {
        return Err(GatewayError::CsrfRejected("token mismatch"));
    }
    Ok(())
}

// readable by the page script, so not HttpOnly
pub fn issue_cookie(token: &str, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token.to_string()))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(max_age.as_secs() as i64))
        .build()
}

/// Validates state-changing requests and issues the cookie when a client
/// does not have one yet.
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if requires_validation(request.method()) {
        if let Err(rejection) = validate(request.headers()) {
            tracing::debug!(
                method = %request.method(),
                path = request.uri().path(),
                error = %rejection,
                "CSRF check failed"
            );
            return rejection.into_response();
        }
    }

    let jar = CookieJar::from_headers(request.headers());
    let existing = jar
        .get(CSRF_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|token| is_well_formed(token));
    let issued = existing.is_none();
    let token = existing.unwrap_or_else(generate_token);
    request.extensions_mut().insert(CsrfToken(token.clone()));

    let response = next.run(request).await;

    if issued {
        let cookie = issue_cookie(&token, state.settings.csrf_max_age, state.settings.production);
        return (jar.add(cookie), response).into_response();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    fn headers(cookie: Option<&str>, header_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = cookie {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("theme=dark; {CSRF_COOKIE}={token}")).unwrap(),
            );
        }
        if let Some(token) = header_token {
            headers.insert(CSRF_HEADER, HeaderValue::from_str(token).unwrap());
        }
        headers
    }

    #[test]
    fn generated_tokens_are_well_formed_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert!(is_well_formed(&a));
        assert!(is_well_formed(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn matching_pair_is_accepted() {
        let token = generate_token();
        assert!(validate(&headers(Some(&token), Some(&token))).is_ok());
    }

    #[test]
    fn well_formed_but_different_tokens_are_rejected() {
        let cookie = generate_token();
        let forged = generate_token();
        assert!(is_well_formed(&forged));

        let err = validate(&headers(Some(&cookie), Some(&forged))).unwrap_err();
        assert!(matches!(err, GatewayError::CsrfRejected("token mismatch")));
    }

    #[test]
    fn missing_half_is_rejected() {
        let token = generate_token();
        assert!(validate(&headers(None, Some(&token))).is_err());
        assert!(validate(&headers(Some(&token), None)).is_err());
        assert!(validate(&headers(Some("abc"), Some("abc"))).is_err());
    }

    #[test]
    fn only_state_changing_methods_are_checked() {
        assert!(requires_validation(&Method::POST));
        assert!(requires_validation(&Method::DELETE));
        assert!(!requires_validation(&Method::GET));
        assert!(!requires_validation(&Method::HEAD));
    }

    #[test]
    fn cookie_attributes_follow_environment() {
        let dev = issue_cookie("abc", Duration::from_secs(3600), false);
        assert_eq!(dev.name(), CSRF_COOKIE);
        assert_eq!(dev.value(), "abc");
        assert_eq!(dev.same_site(), Some(SameSite::Strict));
        assert_eq!(dev.path(), Some("/"));
        assert_eq!(dev.max_age(), Some(time::Duration::hours(1)));
        assert_ne!(dev.http_only(), Some(true));
        assert_ne!(dev.secure(), Some(true));
        assert!(!dev.to_string().contains("HttpOnly"));

        let prod = issue_cookie("abc", Duration::from_secs(3600), true);
        assert_eq!(prod.secure(), Some(true));
        assert!(prod.to_string().contains("; Secure"));
    }

    #[test]
    fn quoted_and_repeated_cookies_are_parsed() {
        let token = generate_token();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; {CSRF_COOKIE}=\"{token}\"")).unwrap(),
        );
        headers.insert(CSRF_HEADER, HeaderValue::from_str(&token).unwrap());
        assert!(validate(&headers).is_ok());
    }
}
