use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use std::sync::Arc;

use crate::csrf::tokens_match;
use crate::error::GatewayError;
use crate::state::AppState;

/// Drop the cached catalog after an ingestion run.
pub async fn purge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let expected = state
        .settings
        .admin_token
        .as_deref()
        .ok_or(GatewayError::Unauthorized)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(GatewayError::Unauthorized)?;

    if !tokens_match(expected, presented.trim()) {
        tracing::warn!("Rejected cache purge with wrong admin token");
        return Err(GatewayError::Unauthorized);
    }

    state.cache.invalidate().await?;

    Ok(Json(serde_json::json!({
        "purged": state.cache.key().to_string(),
    })))
}
