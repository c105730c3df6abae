use async_trait::async_trait;
use axum::Router;
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use confscout_gateway::clock::ManualClock;
use confscout_gateway::config::{Args, Settings};
use confscout_gateway::error::GatewayError;
use confscout_gateway::models::{Catalog, CatalogQuery, Conference};
use confscout_gateway::store::MemoryCacheStore;
use confscout_gateway::{assemble, build_router};

// minute-aligned so windows start exactly at T0
pub const T0: i64 = 1_700_000_040_000;

pub const ADMIN_TOKEN: &str = "integration-admin-token";

/// In-memory catalog service that counts what it was asked for.
#[derive(Default)]
pub struct FakeSource {
    pub canonical_fetches: AtomicUsize,
    pub filtered_fetches: AtomicUsize,
}

impl FakeSource {
    pub fn canonical(&self) -> usize {
        self.canonical_fetches.load(Ordering::SeqCst)
    }

    pub fn filtered(&self) -> usize {
        self.filtered_fetches.load(Ordering::SeqCst)
    }
}

pub fn conference(id: &str, domain: &str) -> Conference {
    Conference {
        id: id.to_string(),
        name: id.replace('-', " "),
        url: format!("https://{id}.example.org"),
        start_date: "2026-11-03".to_string(),
        end_date: None,
        city: Some("Lisbon".to_string()),
        country: Some("Portugal".to_string()),
        continent: Some("Europe".to_string()),
        domain: domain.to_string(),
        online: false,
        cfp: None,
        financial_aid: None,
        coordinates: None,
    }
}

#[async_trait]
impl confscout_gateway::source::DataSource for FakeSource {
    async fn fetch(&self) -> Result<Catalog, GatewayError> {
        self.canonical_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Catalog {
            conferences: vec![conference("rustconf-2026", "rust"), conference("pycon-2026", "python")],
            total: 2,
            generated_at: None,
        })
    }

    async fn fetch_filtered(&self, query: &CatalogQuery) -> Result<Catalog, GatewayError> {
        self.filtered_fetches.fetch_add(1, Ordering::SeqCst);
        let conferences = vec![conference("rustconf-2026", "rust")]
            .into_iter()
            .filter(|c| query.domain.as_deref().is_none_or(|d| d == c.domain))
            .collect::<Vec<_>>();
        Ok(Catalog {
            total: conferences.len(),
            conferences,
            generated_at: None,
        })
    }
}

pub fn settings(extra: &[&str]) -> Settings {
    let mut argv = vec!["confscout-gateway", "--admin-token", ADMIN_TOKEN];
    argv.extend_from_slice(extra);
    Args::parse_from(argv).into_settings().unwrap()
}

pub struct TestGateway {
    pub app: Router,
    pub source: Arc<FakeSource>,
    pub clock: Arc<ManualClock>,
}

/// Single in-process gateway: no shared store, fake catalog, manual clock.
pub fn gateway(extra: &[&str]) -> TestGateway {
    let source = Arc::new(FakeSource::default());
    let clock = Arc::new(ManualClock::new(T0));
    let state = assemble(
        settings(extra),
        None,
        Arc::new(MemoryCacheStore::new()),
        source.clone(),
        clock.clone(),
    );
    TestGateway {
        app: build_router(state),
        source,
        clock,
    }
}
