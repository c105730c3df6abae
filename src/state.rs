use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::Settings;
use crate::rate_limit::RateLimiter;
use crate::source::DataSource;
use crate::store::CacheStore;

// app's shared state, process-wide lifetime

pub struct AppState {
    pub settings: Settings,
    pub limiter: RateLimiter,
    pub cache: CacheManager,
    pub source: Arc<dyn DataSource>, // uncached catalog views go straight here
    pub cache_store: Arc<dyn CacheStore>,
}
