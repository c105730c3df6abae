use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    pub count: u64,
    // false when the counter was already at the limit and left alone
    pub accepted: bool,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    // a key created by this call expires window_ms later
    async fn increment_and_get(
        &self,
        key: &str,
        window_ms: u64,
        limit: u64,
    ) -> Result<CounterHit, GatewayError>;

    async fn health_check(&self) -> bool;
}

// GET + INCR + PEXPIRE must happen as one step, otherwise two instances can
// both read `limit - 1` and push the counter over the quota.
const INCREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[2]) then
    return {current, 0}
end
current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {current, 1}
"#;

pub struct RedisCounterStore {
    pool: Pool,
    script: Script,
}

impl RedisCounterStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(
        &self,
        key: &str,
        window_ms: u64,
        limit: u64,
    ) -> Result<CounterHit, GatewayError> {
        let mut conn = self.pool.get().await?;
        let (count, accepted): (u64, u8) = self
            .script
            .key(key)
            .arg(window_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        Ok(CounterHit {
            count,
            accepted: accepted == 1,
        })
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.pool.get().await else {
            return false;
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}
