mod conferences;
mod csrf;
mod fallback;
mod health;
mod metrics;
mod purge;

pub use conferences::conferences_handler;
pub use csrf::csrf_handler;
pub use fallback::fallback_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use purge::purge_handler;
