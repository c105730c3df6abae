use clap::Parser; // for cli
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use confscout_gateway::config::Args;
use confscout_gateway::{build_router, build_state};

// this is main async function with tokio
#[tokio::main]
async fn main() {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = match args.into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    let port = settings.port;
    let upstream_url = settings.upstream_url.clone();
    let shared_store = settings.redis_url.is_some();
    let cache_settings = settings.cache.clone();
    let policies = settings.policies.clone();

    let state = match build_state(settings).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise gateway");
            std::process::exit(1);
        }
    };

    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(port, upstream = %upstream_url, shared_store, "Gateway running");
    tracing::info!(
        ttl_secs = cache_settings.ttl.as_secs(),
        max_staleness_secs = cache_settings.max_staleness.as_secs(),
        revalidate_in_background = cache_settings.revalidate_in_background,
        "Catalog cache"
    );
    for policy in [&policies.api, &policies.auth, &policies.public] {
        tracing::info!(
            policy = policy.name(),
            max_requests = policy.max_requests,
            window_secs = policy.window.as_secs(),
            "Rate limit policy"
        );
    }

    // peer address feeds the rate limit identity
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        tracing::error!(error = %e, "Server stopped");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
