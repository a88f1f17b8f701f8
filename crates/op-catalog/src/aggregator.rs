//! Catalog aggregator - one coherent answer from three sources
//!
//! Precedence is custom > secondary > primary with whole-entry replacement.
//! Collection queries fan out to every source concurrently and merge what
//! comes back; point lookups walk the precedence list and stop at the first
//! source that answers.

use crate::config::{CatalogConfig, TtlConfig};
use crate::manifest::{ImportRequest, ManifestEntry, ManifestStore};
use crate::merge::{aggregate_metrics, merge_catalogs, merge_keyed, merge_sorted, MetricsContribution};
use crate::openapi::{EndpointDetails, EndpointExamples, EndpointPage, EndpointQuery, EndpointSchema};
use crate::source::{CatalogSource, CustomSource, RemoteSource, SourceKind};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use op_cache::{CacheStats, CatalogCache};
use op_core::{
    ApiPage, ApiSummary, CatalogEntry, CatalogMap, CatalogMetrics, CatalogSummary, CategoryCount,
    Error, Page, Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest page size accepted by listing operations
pub const MAX_PAGE_LIMIT: usize = 100;

/// How many categories and recent APIs a summary carries
pub const SUMMARY_TOP_CATEGORIES: usize = 10;
pub const SUMMARY_RECENT: usize = 5;

/// Fixed aggregate keys
const TRIPLE_KEYS: [&str; 4] = [
    "triple:providers",
    "triple:all_apis",
    "triple:metrics",
    "triple:summary",
];

/// Aggregate key families that depend on the custom source
const TRIPLE_PATTERNS: [&str; 11] = [
    "triple:provider:*",
    "triple:services:*",
    "triple:paginated:*",
    "triple:search:*",
    "triple:popular:*",
    "triple:recent:*",
    "triple:api:*",
    "triple:service_api:*",
    "triple:spec:*",
    "triple:endpoints:*",
    "triple:endpoint_*",
];

/// Per-source outcomes of one fan-out. A source that failed contributes `None`.
struct Settled<T> {
    primary: Option<T>,
    secondary: Option<T>,
    custom: Option<T>,
    failed: usize,
}

impl<T> Settled<T> {
    /// No source failed; `NotFound` answers do not count as failures
    fn complete(&self) -> bool {
        self.failed == 0
    }

    fn any(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some() || self.custom.is_some()
    }

    /// Lowest precedence first
    fn in_order(&self) -> [Option<&T>; 3] {
        [self.primary.as_ref(), self.secondary.as_ref(), self.custom.as_ref()]
    }
}

/// Aggregation client over the primary, secondary and custom sources
pub struct CatalogAggregator {
    primary: Arc<dyn CatalogSource>,
    secondary: Arc<dyn CatalogSource>,
    custom: Arc<CustomSource>,
    cache: Arc<CatalogCache>,
    ttl: TtlConfig,
}

impl CatalogAggregator {
    pub fn new(
        primary: Arc<dyn CatalogSource>,
        secondary: Arc<dyn CatalogSource>,
        custom: Arc<CustomSource>,
        cache: Arc<CatalogCache>,
        ttl: TtlConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            custom,
            cache,
            ttl,
        }
    }

    /// Build every source from configuration, restoring the cache snapshot if one exists
    pub async fn from_config(config: &CatalogConfig) -> anyhow::Result<Self> {
        let cache = Arc::new(CatalogCache::new(config.cache.options()));

        if let Some(path) = &config.cache.snapshot_path {
            if path.exists() {
                match cache.restore(path).await {
                    Ok(count) => info!("Warm start with {} cached entries", count),
                    Err(e) => warn!("Ignoring cache snapshot {}: {}", path.display(), e),
                }
            }
        }

        let primary = RemoteSource::from_config(
            SourceKind::Primary,
            config.primary.clone(),
            cache.clone(),
            config.ttl.clone(),
        )?;
        let secondary = RemoteSource::from_config(
            SourceKind::Secondary,
            config.secondary.clone(),
            cache.clone(),
            config.ttl.clone(),
        )?;

        let manifest = ManifestStore::open(&config.custom.manifest_dir, config.custom.limits)
            .await
            .with_context(|| {
                format!(
                    "Failed to open manifest store at {}",
                    config.custom.manifest_dir.display()
                )
            })?;
        let custom = CustomSource::new(Arc::new(manifest), cache.clone(), config.ttl.clone());

        info!(
            primary = primary.is_enabled(),
            secondary = secondary.is_enabled(),
            manifest = %config.custom.manifest_dir.display(),
            "Catalog aggregator ready"
        );

        Ok(Self::new(
            Arc::new(primary),
            Arc::new(secondary),
            Arc::new(custom),
            cache,
            config.ttl.clone(),
        ))
    }

    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.cache
    }

    pub fn custom(&self) -> &Arc<CustomSource> {
        &self.custom
    }

    pub async fn save_snapshot(&self, path: &Path) -> anyhow::Result<usize> {
        self.cache.snapshot(path).await
    }

    /// Highest precedence first
    fn chain(&self) -> [&dyn CatalogSource; 3] {
        [&*self.custom, &*self.secondary, &*self.primary]
    }

    /// Run `op` against every source concurrently; failures are isolated
    async fn fan_out<'a, T, F>(&'a self, op: F) -> Settled<T>
    where
        F: Fn(&'a dyn CatalogSource) -> BoxFuture<'a, Result<T>>,
    {
        let (primary, secondary, custom) = tokio::join!(
            op(&*self.primary),
            op(&*self.secondary),
            op(&*self.custom as &dyn CatalogSource),
        );

        let mut failed = 0;
        let mut settle = |kind: SourceKind, outcome: Result<T>| match outcome {
            Ok(value) => Some(value),
            Err(Error::NotFound(msg)) => {
                debug!(source = %kind, "Not found: {}", msg);
                None
            }
            Err(e) => {
                warn!(source = %kind, error = %e, "Source failed, contributing nothing");
                failed += 1;
                None
            }
        };

        let primary = settle(SourceKind::Primary, primary);
        let secondary = settle(SourceKind::Secondary, secondary);
        let custom = settle(SourceKind::Custom, custom);

        Settled {
            primary,
            secondary,
            custom,
            failed,
        }
    }

    /// Try sources in precedence order and return the first success. A
    /// non-terminal source is asked only when it claims `id`, and its failures
    /// are swallowed; the primary's error propagates.
    async fn first_success<'a, T, F>(&'a self, id: &str, op: F) -> Result<T>
    where
        F: Fn(&'a dyn CatalogSource) -> BoxFuture<'a, Result<T>>,
    {
        let [custom, secondary, primary] = self.chain();

        for source in [custom, secondary] {
            if !source.has_api(id).await {
                continue;
            }
            match op(source).await {
                Ok(value) => {
                    debug!(source = %source.kind(), id, "Answered by");
                    return Ok(value);
                }
                Err(e) => debug!(source = %source.kind(), error = %e, "Falling back"),
            }
        }
        op(primary).await
    }

    /// Read-through for point lookups; errors are never cached
    async fn cached<T, Fut>(&self, key: &str, ttl: Duration, produce: impl FnOnce() -> Fut) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        self.cache.warm(key, Some(ttl), produce).await
    }

    /// Read-through for merged collections. `produce` reports whether every
    /// source contributed; a result missing a failed source is returned but
    /// not stored. Cache hits are complete by construction.
    async fn cached_collection<T, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        produce: impl FnOnce() -> Fut,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<(T, bool)>>,
    {
        if let Some(value) = self.cache.get::<T>(key).await {
            debug!("Cache hit for {}", key);
            return Ok((value, true));
        }

        let (value, complete) = produce().await?;
        if complete {
            self.cache.set(key, &value, Some(ttl)).await;
        } else {
            warn!("Source failure in {}, result not cached", key);
        }
        Ok((value, complete))
    }

    async fn merged_providers(&self) -> Result<(Vec<String>, bool)> {
        self.cached_collection("triple:providers", self.ttl.providers(), || async {
            let settled = self.fan_out(|s| s.get_providers()).await;
            let complete = settled.complete();
            let merged = merge_sorted([settled.primary, settled.secondary, settled.custom].into_iter().flatten());
            Ok((merged, complete))
        })
        .await
    }

    async fn merged_apis(&self) -> Result<(CatalogMap, bool)> {
        self.cached_collection("triple:all_apis", self.ttl.all_apis(), || async {
            let settled = self.fan_out(|s| s.list_apis()).await;
            let complete = settled.complete();
            let merged = merge_keyed(
                merge_keyed(settled.primary.unwrap_or_default(), settled.secondary.unwrap_or_default()),
                settled.custom.unwrap_or_default(),
            );
            debug!("Merged catalog has {} APIs", merged.len());
            Ok((merged, complete))
        })
        .await
    }

    async fn merged_metrics(&self) -> Result<(CatalogMetrics, bool)> {
        self.cached_collection("triple:metrics", self.ttl.metrics(), || async {
            let (metrics, listings) = tokio::join!(
                self.fan_out(|s| s.get_metrics()),
                self.fan_out(|s| s.list_apis()),
            );

            let contributions: Vec<MetricsContribution<'_>> = metrics
                .in_order()
                .into_iter()
                .zip(listings.in_order())
                .map(|(metrics, apis)| MetricsContribution { metrics, apis })
                .collect();

            let complete = metrics.complete() && listings.complete();
            Ok((aggregate_metrics(&contributions), complete))
        })
        .await
    }

    async fn summaries(&self) -> Result<(Vec<ApiSummary>, bool)> {
        let (apis, complete) = self.merged_apis().await?;
        let summaries = apis
            .iter()
            .map(|(id, entry)| ApiSummary::from_entry(id, entry))
            .collect();
        Ok((summaries, complete))
    }

    /// Case-insensitive search over id, title, description, provider and categories
    pub async fn search_apis(&self, query: &str, page: usize, limit: usize) -> Result<ApiPage> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::validation("Search query must not be empty"));
        }
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let key = format!("triple:search:{}:{}:{}", needle, page, limit);

        let (found, _) = self
            .cached_collection(&key, self.ttl.listing(), || async {
                let (summaries, complete) = self.summaries().await?;
                let mut scored: Vec<(u8, ApiSummary)> = summaries
                    .into_iter()
                    .filter_map(|summary| search_score(&summary, &needle).map(|score| (score, summary)))
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

                let results: Vec<ApiSummary> = scored.into_iter().map(|(_, s)| s).collect();
                Ok((Page::paginate(&results, page, limit), complete))
            })
            .await?;
        Ok(found)
    }

    pub async fn get_paginated_apis(&self, page: usize, limit: usize) -> Result<ApiPage> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let key = format!("triple:paginated:{}:{}", page, limit);
        let (listing, _) = self
            .cached_collection(&key, self.ttl.listing(), || async {
                let (summaries, complete) = self.summaries().await?;
                Ok((Page::paginate(&summaries, page, limit), complete))
            })
            .await?;
        Ok(listing)
    }

    /// Highest `x-popularity` first; APIs without a score come last
    pub async fn get_popular_apis(&self, limit: usize) -> Result<Vec<ApiSummary>> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let key = format!("triple:popular:{}", limit);
        let (popular, _) = self
            .cached_collection(&key, self.ttl.listing(), || async {
                let (mut apis, complete) = self.summaries().await?;
                apis.sort_by(|a, b| {
                    descending_some_first(a.popularity, b.popularity, |x, y| {
                        x.partial_cmp(y).unwrap_or(Ordering::Equal)
                    })
                    .then_with(|| a.id.cmp(&b.id))
                });
                apis.truncate(limit);
                Ok((apis, complete))
            })
            .await?;
        Ok(popular)
    }

    /// Most recently updated first
    pub async fn get_recently_updated(&self, limit: usize) -> Result<Vec<ApiSummary>> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let key = format!("triple:recent:{}", limit);
        let (recent, _) = self
            .cached_collection(&key, self.ttl.listing(), || async {
                let (mut apis, complete) = self.summaries().await?;
                sort_recent(&mut apis);
                apis.truncate(limit);
                Ok((apis, complete))
            })
            .await?;
        Ok(recent)
    }

    pub async fn get_api_summary(&self) -> Result<CatalogSummary> {
        let (summary, _) = self
            .cached_collection("triple:summary", self.ttl.summary(), || async {
                let (apis, providers, metrics) =
                    tokio::join!(self.summaries(), self.merged_providers(), self.merged_metrics());
                let (mut apis, apis_complete) = apis?;
                let (providers, providers_complete) = providers?;
                let (metrics, metrics_complete) = metrics?;

                let mut categories: BTreeMap<String, usize> = BTreeMap::new();
                for category in apis.iter().flat_map(|a| a.categories.iter()) {
                    *categories.entry(category.clone()).or_default() += 1;
                }
                let mut top_categories: Vec<CategoryCount> = categories
                    .into_iter()
                    .map(|(category, count)| CategoryCount { category, count })
                    .collect();
                top_categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
                top_categories.truncate(SUMMARY_TOP_CATEGORIES);

                let total_apis = apis.len();
                sort_recent(&mut apis);
                apis.truncate(SUMMARY_RECENT);

                let summary = CatalogSummary {
                    total_apis,
                    total_providers: providers.len(),
                    top_categories,
                    recently_updated: apis,
                    metrics,
                };
                Ok((summary, apis_complete && providers_complete && metrics_complete))
            })
            .await?;
        Ok(summary)
    }

    /// Import a spec into the custom source and drop every view it affects
    pub async fn import_custom_spec(&self, request: ImportRequest) -> Result<ManifestEntry> {
        let entry = self.custom.import(request).await?;
        self.invalidate_after_custom_change().await;
        Ok(entry)
    }

    pub async fn remove_custom_spec(&self, id: &str) -> Result<ManifestEntry> {
        let entry = self.custom.remove(id).await?;
        self.invalidate_after_custom_change().await;
        Ok(entry)
    }

    /// Purge `custom:*` and every aggregate key. Remote namespaces are kept.
    pub async fn invalidate_after_custom_change(&self) -> usize {
        let mut removed = self.cache.invalidate_pattern("custom:*").await;
        removed += self.cache.invalidate_keys(&TRIPLE_KEYS[..]).await;
        for pattern in TRIPLE_PATTERNS {
            removed += self.cache.invalidate_pattern(pattern).await;
        }
        info!("Custom catalog changed, invalidated {} cache entries", removed);
        removed
    }

    /// Recompute providers, metrics and the full listing concurrently.
    /// Returns how many of the three succeeded.
    pub async fn warm_critical_caches(&self) -> usize {
        let (providers, metrics, apis) =
            tokio::join!(self.get_providers(), self.get_metrics(), self.list_apis());

        let mut warmed = 0;
        for (what, outcome) in [
            ("providers", providers.map(|_| ())),
            ("metrics", metrics.map(|_| ())),
            ("all_apis", apis.map(|_| ())),
        ] {
            match outcome {
                Ok(()) => warmed += 1,
                Err(e) => warn!("Failed to warm {}: {}", what, e),
            }
        }
        info!("Warmed {}/3 critical caches", warmed);
        warmed
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

fn search_score(summary: &ApiSummary, needle: &str) -> Option<u8> {
    let contains = |text: &str| text.to_lowercase().contains(needle);

    if summary.id.to_lowercase() == needle || summary.title.to_lowercase() == needle {
        Some(4)
    } else if contains(&summary.id) {
        Some(3)
    } else if contains(&summary.title) {
        Some(2)
    } else if summary.description.as_deref().is_some_and(contains)
        || contains(&summary.provider)
        || summary.categories.iter().any(|c| contains(c))
    {
        Some(1)
    } else {
        None
    }
}

/// Order `Some` values descending by `cmp`, with `None` last
fn descending_some_first<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn sort_recent(apis: &mut [ApiSummary]) {
    apis.sort_by(|a, b| {
        descending_some_first(a.updated.as_ref(), b.updated.as_ref(), |x, y| x.cmp(y))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl CatalogSource for CatalogAggregator {
    fn kind(&self) -> SourceKind {
        SourceKind::Aggregate
    }

    async fn get_providers(&self) -> Result<Vec<String>> {
        Ok(self.merged_providers().await?.0)
    }

    async fn get_provider(&self, provider: &str) -> Result<CatalogMap> {
        let key = format!("triple:provider:{}", provider);
        self.cached_collection(&key, self.ttl.provider(), || async {
            let settled = self.fan_out(|s| s.get_provider(provider)).await;
            if !settled.any() {
                return Err(Error::not_found(format!("Unknown provider '{}'", provider)));
            }
            let complete = settled.complete();
            let merged = merge_catalogs(
                settled.primary.unwrap_or_default(),
                settled.secondary.unwrap_or_default(),
                settled.custom.unwrap_or_default(),
            );
            Ok((merged, complete))
        })
        .await
        .map(|(merged, _)| merged)
    }

    async fn get_services(&self, provider: &str) -> Result<Vec<String>> {
        let key = format!("triple:services:{}", provider);
        self.cached_collection(&key, self.ttl.services(), || async {
            let settled = self.fan_out(|s| s.get_services(provider)).await;
            if !settled.any() {
                return Err(Error::not_found(format!("Unknown provider '{}'", provider)));
            }
            let complete = settled.complete();
            let merged = merge_sorted([settled.primary, settled.secondary, settled.custom].into_iter().flatten());
            Ok((merged, complete))
        })
        .await
        .map(|(merged, _)| merged)
    }

    async fn get_api(&self, provider: &str, api: &str) -> Result<CatalogEntry> {
        let key = format!("triple:api:{}:{}", provider, api);
        let id = format!("{}:{}", provider, api);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(&id, |s| s.get_api(provider, api))
        })
        .await
    }

    async fn get_service_api(&self, provider: &str, service: &str, api: &str) -> Result<CatalogEntry> {
        let key = format!("triple:service_api:{}:{}:{}", provider, service, api);
        let id = format!("{}:{}:{}", provider, service, api);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(&id, |s| s.get_service_api(provider, service, api))
        })
        .await
    }

    async fn list_apis(&self) -> Result<CatalogMap> {
        Ok(self.merged_apis().await?.0)
    }

    async fn get_metrics(&self) -> Result<CatalogMetrics> {
        Ok(self.merged_metrics().await?.0)
    }

    async fn has_provider(&self, provider: &str) -> bool {
        let [custom, secondary, primary] = self.chain();
        custom.has_provider(provider).await
            || secondary.has_provider(provider).await
            || primary.has_provider(provider).await
    }

    async fn has_api(&self, id: &str) -> bool {
        let [custom, secondary, primary] = self.chain();
        custom.has_api(id).await || secondary.has_api(id).await || primary.has_api(id).await
    }

    async fn get_openapi_spec(&self, id: &str) -> Result<Value> {
        let key = format!("triple:spec:{}", id);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(id, |s| s.get_openapi_spec(id))
        })
        .await
    }

    async fn get_api_endpoints(&self, id: &str, query: &EndpointQuery) -> Result<EndpointPage> {
        let key = format!("triple:endpoints:{}:{}", id, query.cache_key());
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(id, |s| s.get_api_endpoints(id, query))
        })
        .await
    }

    async fn get_endpoint_details(&self, id: &str, method: &str, path: &str) -> Result<EndpointDetails> {
        let key = format!("triple:endpoint_details:{}:{}:{}", id, method.to_uppercase(), path);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(id, |s| {
                s.get_endpoint_details(id, method, path)
            })
        })
        .await
    }

    async fn get_endpoint_schema(&self, id: &str, method: &str, path: &str) -> Result<EndpointSchema> {
        let key = format!("triple:endpoint_schema:{}:{}:{}", id, method.to_uppercase(), path);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(id, |s| {
                s.get_endpoint_schema(id, method, path)
            })
        })
        .await
    }

    async fn get_endpoint_examples(&self, id: &str, method: &str, path: &str) -> Result<EndpointExamples> {
        let key = format!("triple:endpoint_examples:{}:{}:{}", id, method.to_uppercase(), path);
        self.cached(&key, self.ttl.lookup(), || {
            self.first_success(id, |s| {
                s.get_endpoint_examples(id, method, path)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, updated: Option<&str>, popularity: Option<f64>) -> ApiSummary {
        ApiSummary {
            id: id.to_string(),
            title: id.to_uppercase(),
            description: None,
            provider: id.to_string(),
            preferred_version: "1".to_string(),
            categories: vec!["tools".to_string()],
            updated: updated.map(String::from),
            popularity,
        }
    }

    #[test]
    fn test_search_score_ranks_id_over_title_over_metadata() {
        let api = summary("stripe.com", None, None);
        assert_eq!(search_score(&api, "stripe.com"), Some(4));
        assert_eq!(search_score(&api, "stripe"), Some(3));
        assert_eq!(search_score(&api, "tools"), Some(1));
        assert_eq!(search_score(&api, "github"), None);
    }

    #[test]
    fn test_sort_recent_puts_undated_last() {
        let mut apis = vec![
            summary("a", None, None),
            summary("b", Some("2021-01-01T00:00:00Z"), None),
            summary("c", Some("2023-06-01T00:00:00Z"), None),
        ];
        sort_recent(&mut apis);
        let ids: Vec<&str> = apis.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_popularity_order() {
        let mut apis = vec![
            summary("low", None, Some(1.0)),
            summary("none", None, None),
            summary("high", None, Some(9.5)),
        ];
        apis.sort_by(|a, b| {
            descending_some_first(a.popularity, b.popularity, |x, y| {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            })
        });
        let ids: Vec<&str> = apis.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "none"]);
    }
}
