// Read-through cache for the canonical catalog view. Freshness is derived
// from fetched_at_ms on every read; population is single-flight per key.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::metrics::{CACHE_LOOKUPS, UPSTREAM_FETCHES};
use crate::models::Catalog;
use crate::source::DataSource;
use crate::store::CacheStore;

pub const CATALOG_RESOURCE: &str = "conferences";

// {namespace}:v{schema_version}:{resource}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub namespace: String,
    pub schema_version: u32,
    pub resource: &'static str,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}:{}", self.namespace, self.schema_version, self.resource)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub schema_version: u32,
    pub payload: Arc<Catalog>,
    pub fetched_at_ms: i64,
    pub ttl_ms: u64,
    pub max_staleness_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl Freshness {
    fn label(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

impl CacheEntry {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at_ms)
    }

    pub fn freshness(&self, now_ms: i64) -> Freshness {
        let age = self.age_ms(now_ms);
        if age <= self.ttl_ms as i64 {
            Freshness::Fresh
        } else if age <= self.max_staleness_ms as i64 {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub namespace: String,
    pub schema_version: u32,
    pub ttl: Duration,
    pub max_staleness: Duration,
    // how long a caller waits for a population fetch
    pub fetch_timeout: Duration,
    pub fetch_hard_timeout: Duration,
    pub store_timeout: Duration,
    // off: stale entries are only a fallback for a slow or failed fetch
    pub revalidate_in_background: bool,
}

type FetchResult = Result<Arc<Catalog>, GatewayError>;

struct Inner {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    // one sender per key with a fetch in progress
    in_flight: DashMap<String, broadcast::Sender<FetchResult>>,
}

// Unregisters a flight even when the fetch panics, so later callers start a
// new one. A flight replaced after `invalidate` is left alone.
struct FlightGuard {
    inner: Arc<Inner>,
    key: String,
    tx: broadcast::Sender<FetchResult>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.key, |_, tx| tx.same_channel(&self.tx));
    }
}

#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                clock,
                settings,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            namespace: self.inner.settings.namespace.clone(),
            schema_version: self.inner.settings.schema_version,
            resource: CATALOG_RESOURCE,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub async fn get(&self) -> Result<Arc<Catalog>, GatewayError> {
        let key = self.key().to_string();
        let now = self.inner.clock.now_ms();

        let fallback = match self.read_entry(&key).await {
            Some(entry) => {
                let freshness = entry.freshness(now);
                CACHE_LOOKUPS.with_label_values(&[freshness.label()]).inc();

                match freshness {
                    Freshness::Fresh => {
                        tracing::debug!(key = %key, age_ms = entry.age_ms(now), "Cache HIT");
                        return Ok(entry.payload);
                    }
                    Freshness::Stale if self.inner.settings.revalidate_in_background => {
                        tracing::debug!(
                            key = %key,
                            age_ms = entry.age_ms(now),
                            "Cache HIT (stale), refreshing in background"
                        );
                        // the receiver is dropped; the fetch writes the store on its own
                        let _ = self.join_or_start(&key);
                        return Ok(entry.payload);
                    }
                    Freshness::Stale => Some(entry),
                    Freshness::Expired => {
                        tracing::debug!(key = %key, age_ms = entry.age_ms(now), "Cache entry expired");
                        None
                    }
                }
            }
            None => {
                CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                tracing::debug!(key = %key, "Cache MISS");
                None
            }
        };

        let rx = self.join_or_start(&key);
        self.await_fetch(&key, rx, fallback).await
    }

    /// Drop the canonical entry, e.g. after an ingestion run. Fetches that
    /// started before the purge can no longer write their result back.
    pub async fn invalidate(&self) -> Result<(), GatewayError> {
        let key = self.key().to_string();
        let purged_at = self.inner.clock.now_ms();

        // later callers start a new fetch instead of joining a pre-purge one
        self.inner.in_flight.remove(&key);

        timeout(
            self.inner.settings.store_timeout,
            self.inner.store.delete(&key, purged_at),
        )
        .await
        .map_err(|_| GatewayError::UpstreamTimeout("cache store delete".to_string()))??;

        tracing::info!(key = %key, "Cache invalidated");
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        match timeout(self.inner.settings.store_timeout, self.inner.store.get(key)).await {
            Ok(Ok(entry)) => entry.filter(|entry| {
                // a shared store may hold entries written under another schema
                entry.schema_version == self.inner.settings.schema_version
            }),
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Cache store read failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!(key = %key, "Cache store read timed out, treating as miss");
                None
            }
        }
    }

    // Subscribe to the running fetch for `key`, or start one.
    fn join_or_start(&self, key: &str) -> broadcast::Receiver<FetchResult> {
        match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(flight) => {
                tracing::debug!(key = %key, "Joining in-flight fetch");
                flight.get().subscribe()
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = broadcast::channel(1);
                slot.insert(tx.clone());

                let manager = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    manager.populate(key, tx).await;
                });
                rx
            }
        }
    }

    // Runs detached from any caller, so a caller giving up does not cancel it.
    async fn populate(self, key: String, tx: broadcast::Sender<FetchResult>) {
        let flight = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            tx: tx.clone(),
        };
        let settings = &self.inner.settings;
        let started_at = self.inner.clock.now_ms();
        tracing::debug!(key = %key, "Fetching catalog from upstream");

        let result = match timeout(settings.fetch_hard_timeout, self.inner.source.fetch()).await {
            Ok(Ok(catalog)) => {
                UPSTREAM_FETCHES.with_label_values(&["ok"]).inc();
                let payload = Arc::new(catalog);
                self.write_entry(&key, Arc::clone(&payload), started_at).await;
                Ok(payload)
            }
            Ok(Err(e)) => {
                UPSTREAM_FETCHES.with_label_values(&["error"]).inc();
                tracing::warn!(key = %key, error = %e, "Catalog fetch failed");
                Err(e)
            }
            Err(_) => {
                UPSTREAM_FETCHES.with_label_values(&["timeout"]).inc();
                tracing::warn!(
                    key = %key,
                    limit_ms = settings.fetch_hard_timeout.as_millis() as u64,
                    "Catalog fetch abandoned"
                );
                Err(GatewayError::UpstreamTimeout("catalog fetch".to_string()))
            }
        };

        drop(flight);
        // no receivers left is fine: everyone already gave up
        let _ = tx.send(result);
    }

    async fn write_entry(&self, key: &str, payload: Arc<Catalog>, fetched_at_ms: i64) {
        let settings = &self.inner.settings;
        let entry = CacheEntry {
            key: key.to_string(),
            schema_version: settings.schema_version,
            payload,
            fetched_at_ms,
            ttl_ms: settings.ttl.as_millis() as u64,
            max_staleness_ms: settings.max_staleness.as_millis() as u64,
        };

        match timeout(settings.store_timeout, self.inner.store.set(key, &entry)).await {
            Ok(Ok(true)) => tracing::debug!(key = %key, "Cache entry written"),
            Ok(Ok(false)) => {
                tracing::debug!(key = %key, "Newer cache entry already stored, keeping it")
            }
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "Cache store write failed"),
            Err(_) => tracing::warn!(key = %key, "Cache store write timed out"),
        }
    }

    async fn await_fetch(
        &self,
        key: &str,
        mut rx: broadcast::Receiver<FetchResult>,
        fallback: Option<CacheEntry>,
    ) -> Result<Arc<Catalog>, GatewayError> {
        let outcome = timeout(self.inner.settings.fetch_timeout, rx.recv()).await;

        let err = match outcome {
            Ok(Ok(Ok(payload))) => return Ok(payload),
            Ok(Ok(Err(e))) => GatewayError::CacheUnrecoverable(e.to_string()),
            Ok(Err(_)) => GatewayError::CacheUnrecoverable("catalog fetch aborted".to_string()),
            Err(_) => GatewayError::UpstreamTimeout("catalog fetch".to_string()),
        };

        // re-check: the entry may have aged past the bound while we waited
        let now = self.inner.clock.now_ms();
        match fallback.filter(|entry| entry.freshness(now) != Freshness::Expired) {
            Some(entry) => {
                tracing::info!(
                    key = %key,
                    age_ms = entry.age_ms(now),
                    reason = %err,
                    "Serving stale catalog"
                );
                Ok(entry.payload)
            }
            None => Err(err),
        }
    }
}
