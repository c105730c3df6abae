use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use std::time::Duration;

use crate::error::GatewayError;

// an unreachable server is not fatal, both stores degrade per call
pub async fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Pool, GatewayError> {
    tracing::info!(url = %url, pool_size, "Connecting to Redis");

    let mut pool_config = PoolConfig::new(pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut config = Config::from_url(url);
    config.pool = Some(pool_config);

    let pool = config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| GatewayError::Configuration(format!("invalid redis url {url}: {e}")))?;

    match pool.get().await {
        Ok(_) => tracing::info!("Connected to Redis"),
        Err(e) => tracing::warn!(
            error = %e,
            "Redis unreachable at startup; rate limiting falls back to in-process counters"
        ),
    }

    Ok(pool)
}
