//! Remote directory source (APIs.guru v2 layout)

use super::{
    lookup_entry, select_version, validate_segment, CatalogSource, SourceKind,
};
use crate::config::{RemoteSourceConfig, TtlConfig};
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use op_cache::CatalogCache;
use op_core::{CatalogEntry, CatalogId, CatalogMap, CatalogMetrics, Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A rate-limited, cached view of one remote directory
pub struct RemoteSource {
    kind: SourceKind,
    config: RemoteSourceConfig,
    fetcher: Arc<dyn HttpFetcher>,
    cache: Arc<CatalogCache>,
    limiter: RateLimiter,
    ttl: TtlConfig,
}

impl RemoteSource {
    pub fn new(
        kind: SourceKind,
        config: RemoteSourceConfig,
        fetcher: Arc<dyn HttpFetcher>,
        cache: Arc<CatalogCache>,
        limiter: RateLimiter,
        ttl: TtlConfig,
    ) -> Self {
        Self {
            kind,
            config,
            fetcher,
            cache,
            limiter,
            ttl,
        }
    }

    /// Build with a reqwest fetcher and a limiter sized from `config`
    pub fn from_config(
        kind: SourceKind,
        config: RemoteSourceConfig,
        cache: Arc<CatalogCache>,
        ttl: TtlConfig,
    ) -> anyhow::Result<Self> {
        let fetcher = ReqwestFetcher::new(config.timeout(), config.auth.as_ref())?;
        let limiter = RateLimiter::new(kind.namespace(), config.rate_limit);
        Ok(Self::new(kind, config, Arc::new(fetcher), cache, limiter, ttl))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.base_url.is_empty()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &RemoteSourceConfig {
        &self.config
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.kind.namespace(), suffix)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::not_found(format!("{} source is disabled", self.kind)))
        }
    }

    /// Fetch an absolute URL through the cache and the limiter
    async fn fetch_url(&self, cache_suffix: &str, url: &str, ttl: Duration) -> Result<Value> {
        self.ensure_enabled()?;
        let key = self.key(cache_suffix);
        self.cache
            .warm(&key, Some(ttl), || async {
                debug!(source = %self.kind, %url, "Cache miss, fetching");
                self.limiter.execute(|| self.fetcher.get_json(url)).await
            })
            .await
    }

    async fn fetch(&self, cache_suffix: &str, path: &str, ttl: Duration) -> Result<Value> {
        let url = self.config.url(path);
        self.fetch_url(cache_suffix, &url, ttl).await
    }

    async fn fetch_entry(&self, cache_suffix: &str, path: &str) -> Result<CatalogEntry> {
        let value = self.fetch(cache_suffix, path, self.ttl.lookup()).await?;
        decode(value)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// `{"data": [...]}` or a bare array
fn string_list(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Object(mut map) => decode(map.remove("data").unwrap_or(Value::Array(vec![]))),
        other => decode(other),
    }
}

/// `{"apis": {...}}` or a bare id map
fn catalog_map(value: Value) -> Result<CatalogMap> {
    match value {
        Value::Object(mut map) if map.get("apis").is_some_and(Value::is_object) => {
            decode(map.remove("apis").unwrap_or_default())
        }
        other => decode(other),
    }
}

#[async_trait]
impl CatalogSource for RemoteSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn get_providers(&self) -> Result<Vec<String>> {
        let value = self
            .fetch("providers", "/providers.json", self.ttl.providers())
            .await?;
        string_list(value)
    }

    async fn get_provider(&self, provider: &str) -> Result<CatalogMap> {
        let provider = validate_segment("provider", provider)?;
        let value = self
            .fetch(
                &format!("provider:{}", provider),
                &format!("/{}.json", provider),
                self.ttl.provider(),
            )
            .await?;
        catalog_map(value)
    }

    async fn get_services(&self, provider: &str) -> Result<Vec<String>> {
        let provider = validate_segment("provider", provider)?;
        let value = self
            .fetch(
                &format!("services:{}", provider),
                &format!("/{}/services.json", provider),
                self.ttl.services(),
            )
            .await?;
        string_list(value)
    }

    async fn get_api(&self, provider: &str, api: &str) -> Result<CatalogEntry> {
        let provider = validate_segment("provider", provider)?;
        let api = validate_segment("api", api)?;
        self.fetch_entry(
            &format!("api:{}:{}", provider, api),
            &format!("/specs/{}/{}.json", provider, api),
        )
        .await
    }

    async fn get_service_api(&self, provider: &str, service: &str, api: &str) -> Result<CatalogEntry> {
        let provider = validate_segment("provider", provider)?;
        let service = validate_segment("service", service)?;
        let api = validate_segment("api", api)?;
        self.fetch_entry(
            &format!("service_api:{}:{}:{}", provider, service, api),
            &format!("/specs/{}/{}/{}.json", provider, service, api),
        )
        .await
    }

    async fn list_apis(&self) -> Result<CatalogMap> {
        let value = self.fetch("all_apis", "/list.json", self.ttl.all_apis()).await?;
        catalog_map(value)
    }

    async fn get_metrics(&self) -> Result<CatalogMetrics> {
        let value = self.fetch("metrics", "/metrics.json", self.ttl.metrics()).await?;
        decode(value)
    }

    async fn get_openapi_spec(&self, id: &str) -> Result<Value> {
        self.ensure_enabled()?;
        let parsed = CatalogId::parse(id)?;
        let apis = self.list_apis().await?;

        let entry = lookup_entry(&apis, &parsed)
            .ok_or_else(|| Error::not_found(format!("{} has no API '{}'", self.kind, id)))?;
        let url = select_version(entry, &parsed)
            .and_then(|record| record.spec_url.clone())
            .ok_or_else(|| Error::not_found(format!("{} lists no spec URL for '{}'", self.kind, id)))?;

        self.fetch_url(&format!("spec:{}", id), &url, self.ttl.lookup()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MemoryFetcher;
    use crate::rate_limit::RateLimitConfig;
    use op_core::ErrorKind;
    use serde_json::json;

    const BASE: &str = "https://primary.test/v2";

    fn source(fetcher: Arc<MemoryFetcher>, cache: Arc<CatalogCache>) -> RemoteSource {
        RemoteSource::new(
            SourceKind::Primary,
            RemoteSourceConfig::new(BASE, RateLimitConfig::new(100, 60_000)),
            fetcher,
            cache,
            RateLimiter::new("primary", RateLimitConfig::new(100, 60_000)),
            TtlConfig::default(),
        )
    }

    fn seeded() -> Arc<MemoryFetcher> {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(format!("{}/providers.json", BASE), json!({ "data": ["github.com", "googleapis.com"] }));
        fetcher.insert(
            format!("{}/list.json", BASE),
            json!({
                "github.com": {
                    "preferred": "1.1.4",
                    "versions": { "1.1.4": {
                        "swaggerUrl": "https://primary.test/specs/github.json",
                        "info": { "title": "GitHub" }
                    } }
                }
            }),
        );
        fetcher.insert(
            "https://primary.test/specs/github.json",
            json!({ "openapi": "3.0.0", "info": { "title": "GitHub" }, "paths": { "/user": { "get": {} } } }),
        );
        fetcher.insert(format!("{}/metrics.json", BASE), json!({ "numSpecs": 3, "numAPIs": 2, "numEndpoints": 90 }));
        fetcher
    }

    #[tokio::test]
    async fn test_reads_are_cached_under_namespace() {
        let fetcher = seeded();
        let cache = Arc::new(CatalogCache::default());
        let source = source(fetcher.clone(), cache.clone());

        assert_eq!(source.get_providers().await.unwrap(), vec!["github.com", "googleapis.com"]);
        assert_eq!(source.get_providers().await.unwrap().len(), 2);
        assert_eq!(fetcher.requests(), 1);
        assert!(cache.contains("primary:providers").await);
    }

    #[tokio::test]
    async fn test_spec_resolution_via_listing() {
        let source = source(seeded(), Arc::new(CatalogCache::default()));

        let doc = source.get_openapi_spec("github.com").await.unwrap();
        assert_eq!(doc["info"]["title"], "GitHub");

        let page = source
            .get_api_endpoints("github.com", &crate::openapi::EndpointQuery::default())
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);

        let err = source.get_openapi_spec("unknown.io").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_presence_checks_never_fail() {
        let fetcher = seeded();
        fetcher.fail(format!("{}/providers.json", BASE), 503);
        let source = source(fetcher, Arc::new(CatalogCache::default()));

        assert!(!source.has_provider("github.com").await);
        assert!(source.has_api("github.com").await);
        assert!(!source.has_api("github.com:9.9.9").await);
        assert!(!source.has_api("::").await);
    }

    #[tokio::test]
    async fn test_errors_are_classified_and_not_cached() {
        let fetcher = seeded();
        fetcher.fail(format!("{}/acme.io.json", BASE), 404);
        let cache = Arc::new(CatalogCache::default());
        let source = source(fetcher, cache.clone());

        let err = source.get_provider("acme.io").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!cache.contains("primary:provider:acme.io").await);

        let err = source.get_provider("../secrets").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_disabled_source_answers_not_found() {
        let fetcher = seeded();
        let mut config = RemoteSourceConfig::secondary();
        config.base_url = BASE.to_string();
        let source = RemoteSource::new(
            SourceKind::Secondary,
            config,
            fetcher.clone(),
            Arc::new(CatalogCache::default()),
            RateLimiter::unbounded("secondary"),
            TtlConfig::default(),
        );

        assert_eq!(source.list_apis().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!source.has_provider("github.com").await);
        assert_eq!(fetcher.requests(), 0);
    }

    #[tokio::test]
    async fn test_metrics_decode() {
        let source = source(seeded(), Arc::new(CatalogCache::default()));
        let metrics = source.get_metrics().await.unwrap();
        assert_eq!(metrics.num_apis, 2);
        assert_eq!(metrics.num_endpoints, 90);
    }
}
