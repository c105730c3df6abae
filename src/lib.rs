//! Admission control and read-through caching in front of the conference
//! catalog.
//!
//! Requests pass the rate limiter first, then CSRF validation for
//! state-changing methods, then reach a handler. The canonical catalog view
//! is served through [`cache::CacheManager`]; every other view goes to the
//! catalog service directly.

pub mod admission;
pub mod cache;
pub mod clock;
pub mod config;
pub mod csrf;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod source;
pub mod state;
pub mod store;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::source::{DataSource, HttpDataSource};
use crate::state::AppState;
use crate::store::{CacheStore, CounterStore, MemoryCacheStore, RedisCacheStore, RedisCounterStore};

/// Router with admission and CSRF layers in front of every route.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/conferences", get(handlers::conferences_handler))
        .route("/api/csrf", get(handlers::csrf_handler))
        .route("/api/cache/purge", post(handlers::purge_handler))
        .fallback(handlers::fallback_handler)
        // layers run bottom-up: admission first, then csrf
        .layer(middleware::from_fn_with_state(state.clone(), csrf::csrf_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), admission::admission_middleware))
        .with_state(state)
}

/// Wire stores, limiter and cache from explicit collaborators.
pub fn assemble(
    settings: Settings,
    counter_store: Option<Arc<dyn CounterStore>>,
    cache_store: Arc<dyn CacheStore>,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
) -> Arc<AppState> {
    let limiter = RateLimiter::new(counter_store, clock.clone(), settings.limiter.clone());
    let cache = CacheManager::new(
        cache_store.clone(),
        source.clone(),
        clock,
        settings.cache.clone(),
    );

    Arc::new(AppState {
        settings,
        limiter,
        cache,
        source,
        cache_store,
    })
}

/// Production wiring: Redis when configured, in-process stores otherwise,
/// and the HTTP catalog service as data source.
pub async fn build_state(settings: Settings) -> Result<Arc<AppState>, GatewayError> {
    let counter_store: Option<Arc<dyn CounterStore>>;
    let cache_store: Arc<dyn CacheStore>;
    match &settings.redis_url {
        Some(url) => {
            let pool = store::connect(url, settings.redis_pool_size, settings.limiter.store_timeout).await?;
            counter_store = Some(Arc::new(RedisCounterStore::new(pool.clone())) as Arc<dyn CounterStore>);
            cache_store = Arc::new(RedisCacheStore::new(pool, settings.cache.fetch_hard_timeout));
        }
        None => {
            tracing::info!("No Redis configured, counters and cache are in-process only");
            counter_store = None;
            cache_store = Arc::new(MemoryCacheStore::new());
        }
    }

    let source = HttpDataSource::new(
        reqwest::Client::new(),
        &settings.upstream_url,
        settings.cache.fetch_hard_timeout,
    )?;

    Ok(assemble(
        settings,
        counter_store,
        cache_store,
        Arc::new(source),
        Arc::new(SystemClock),
    ))
}
