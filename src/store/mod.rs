// Redis-backed or in-process stores for the limiter and the cache

mod cache;
mod counter;
mod pool;

pub use cache::{CacheStore, MemoryCacheStore, RedisCacheStore};
pub use counter::{CounterHit, CounterStore, RedisCounterStore};
pub use pool::connect;
