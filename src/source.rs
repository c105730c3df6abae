use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

use crate::error::GatewayError;
use crate::models::{Catalog, CatalogQuery};

/// Authoritative catalog supplier.
///
/// Reads are idempotent, so duplicate fetches across instances are harmless.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Canonical, unfiltered catalog. The only shape that gets cached.
    async fn fetch(&self) -> Result<Catalog, GatewayError>;

    /// Filtered, searched, paged or personalised view. Never cached.
    async fn fetch_filtered(&self, query: &CatalogQuery) -> Result<Catalog, GatewayError>;
}

// Catalog service reached over HTTP
pub struct HttpDataSource {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpDataSource {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        // add http:// if not present
        let base = if base_url.starts_with("http") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        let endpoint = Url::parse(&format!("{base}/conferences"))
            .map_err(|e| GatewayError::Configuration(format!("invalid upstream url {base_url}: {e}")))?;

        tracing::info!(endpoint = %endpoint, "Catalog upstream configured");
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    async fn get(&self, url: Url) -> Result<Catalog, GatewayError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "{url} answered {status}"
            )));
        }

        response
            .json::<Catalog>()
            .await
            .map_err(|e| classify(&url, e))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(&self) -> Result<Catalog, GatewayError> {
        self.get(self.endpoint.clone()).await
    }

    async fn fetch_filtered(&self, query: &CatalogQuery) -> Result<Catalog, GatewayError> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query.to_pairs() {
                pairs.append_pair(&name, &value);
            }
        }
        self.get(url).await
    }
}

fn classify(url: &Url, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout(format!("catalog request to {url}"))
    } else if err.is_decode() {
        GatewayError::UpstreamUnavailable(format!("unreadable catalog from {url}: {err}"))
    } else {
        GatewayError::UpstreamUnavailable(format!("catalog request to {url} failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_scheme_and_path() {
        let source =
            HttpDataSource::new(reqwest::Client::new(), "catalog:3000/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(source.endpoint.as_str(), "http://catalog:3000/conferences");
    }

    #[test]
    fn garbage_upstream_is_a_configuration_error() {
        let result = HttpDataSource::new(reqwest::Client::new(), "http://[bad", Duration::from_secs(1));
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}
