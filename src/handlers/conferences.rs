use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, header},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tokio::time::timeout;

use crate::error::GatewayError;
use crate::metrics::CACHE_BYPASS;
use crate::models::{Catalog, CatalogQuery};
use crate::state::AppState;

// Session cookie set by the auth service; its presence means personalised content
const SESSION_COOKIE: &str = "confscout_session";

/// Conference catalog.
///
/// Only the canonical view goes through the cache. Anything filtered,
/// searched, paged past the first page or authenticated goes straight to the
/// catalog service, so personalised or partial results can never be stored
/// under the shared key.
pub async fn conferences_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Json<Arc<Catalog>>, GatewayError> {
    let authenticated =
        headers.contains_key(header::AUTHORIZATION) || jar.get(SESSION_COOKIE).is_some();
    let query = CatalogQuery::from_params(&params, authenticated);

    if query.is_canonical() {
        return state.cache.get().await.map(Json);
    }

    CACHE_BYPASS.inc();
    tracing::debug!(?query, "Bypassing cache for non-canonical catalog request");

    let fetch_timeout = state.cache.settings().fetch_timeout;
    let catalog = timeout(fetch_timeout, state.source.fetch_filtered(&query))
        .await
        .map_err(|_| GatewayError::UpstreamTimeout("filtered catalog fetch".to_string()))??;

    Ok(Json(Arc::new(catalog)))
}
