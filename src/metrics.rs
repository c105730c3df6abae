use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Histogram, register_counter, register_counter_vec, register_histogram,
};

// Registration only fails on duplicate names, which would be a programming error.
lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("confscout_requests_total", "Total number of requests").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "confscout_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMIT_DECISIONS: CounterVec = register_counter_vec!(
        "confscout_rate_limit_decisions_total",
        "Rate limit decisions by policy and outcome",
        &["policy", "outcome"]
    )
    .unwrap();
    pub static ref RATE_LIMIT_FALLBACK: Counter = register_counter!(
        "confscout_rate_limit_fallback_total",
        "Checks answered by the in-process fallback"
    )
    .unwrap();
    pub static ref CACHE_LOOKUPS: CounterVec = register_counter_vec!(
        "confscout_cache_lookups_total",
        "Catalog cache lookups by entry state",
        &["state"]
    )
    .unwrap();
    pub static ref CACHE_BYPASS: Counter = register_counter!(
        "confscout_cache_bypass_total",
        "Catalog requests served straight from upstream"
    )
    .unwrap();
    pub static ref UPSTREAM_FETCHES: CounterVec = register_counter_vec!(
        "confscout_upstream_fetches_total",
        "Catalog population fetches by outcome",
        &["outcome"]
    )
    .unwrap();
}
