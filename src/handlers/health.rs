use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;
use tokio::time::timeout;

use crate::state::AppState;

// health handler
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_timeout = state.settings.limiter.store_timeout;

    let cache_store = timeout(store_timeout, state.cache_store.health_check())
        .await
        .unwrap_or(false);
    let counter_store = match state.limiter.store_healthy().await {
        Some(true) => "up",
        Some(false) => "down",
        None => "in-process",
    };

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "counterStore": counter_store,
        "cacheStore": if cache_store { "up" } else { "down" },
        "cacheKey": state.cache.key().to_string(),
    }))
}
