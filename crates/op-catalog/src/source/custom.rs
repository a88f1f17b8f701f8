//! Local source backed by the manifest store

use super::{
    entry_with_version, lookup_entry, provider_entries, providers_of, services_of, CatalogSource,
    SourceKind,
};
use crate::config::TtlConfig;
use crate::manifest::{ImportRequest, ManifestEntry, ManifestStore};
use crate::openapi::count_operations;
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use op_cache::CatalogCache;
use op_core::{
    ApiInfo, CatalogEntry, CatalogId, CatalogMap, CatalogMetrics, Error, Result, VersionRecord,
    CUSTOM_PROVIDER,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Cache keys owned by this source
pub const CUSTOM_KEYS: [&str; 3] = ["custom:providers", "custom:all_apis", "custom:metrics"];

/// Imported specs exposed through the catalog surface
pub struct CustomSource {
    manifest: Arc<ManifestStore>,
    cache: Arc<CatalogCache>,
    limiter: RateLimiter,
    ttl: TtlConfig,
}

impl CustomSource {
    pub fn new(manifest: Arc<ManifestStore>, cache: Arc<CatalogCache>, ttl: TtlConfig) -> Self {
        Self {
            manifest,
            cache,
            limiter: RateLimiter::unbounded(SourceKind::Custom.namespace()),
            ttl,
        }
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    /// Import a spec and drop this source's cached views
    pub async fn import(&self, request: ImportRequest) -> Result<ManifestEntry> {
        let entry = self.manifest.import_spec(request).await?;
        self.invalidate().await;
        Ok(entry)
    }

    /// Remove a spec by id and drop this source's cached views
    pub async fn remove(&self, id: &str) -> Result<ManifestEntry> {
        let entry = self.manifest.remove_spec(id).await?;
        self.invalidate().await;
        Ok(entry)
    }

    /// Purge everything under the `custom:` namespace
    pub async fn invalidate(&self) -> usize {
        let removed = self.cache.invalidate_pattern("custom:*").await;
        info!("Invalidated {} custom cache entries", removed);
        removed
    }

    /// Manifest entries ordered oldest import first
    async fn entries(&self) -> Result<Vec<ManifestEntry>> {
        let mut entries = self.limiter.execute(|| self.manifest.list()).await?;
        entries.sort_by(|a, b| a.imported_at.cmp(&b.imported_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Manifest entry whose id or listing key matches `id`
    async fn find(&self, id: &str) -> Result<ManifestEntry> {
        let parsed = CatalogId::parse(id)?;
        let entries = self.entries().await?;

        if let Some(entry) = entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }

        let listing = build_listing(&entries);
        let version = lookup_entry(&listing, &parsed)
            .map(|entry| {
                parsed
                    .version
                    .clone()
                    .filter(|v| entry.versions.contains_key(v))
                    .unwrap_or_else(|| entry.preferred.clone())
            })
            .ok_or_else(|| Error::not_found(format!("No custom spec for '{}'", id)))?;

        entries
            .into_iter()
            .rev()
            .find(|e| e.version == version && (e.catalog_key() == id || e.catalog_key() == parsed.base()))
            .ok_or_else(|| Error::not_found(format!("No custom spec for '{}'", id)))
    }
}

fn version_record(entry: &ManifestEntry) -> VersionRecord {
    let (provider, service) = match entry.replaces.as_deref().map(CatalogId::parse) {
        Some(Ok(id)) => (id.provider, id.service),
        _ => (CUSTOM_PROVIDER.to_string(), Some(entry.name.clone())),
    };
    let imported = entry.imported_at.to_rfc3339();

    VersionRecord {
        added: Some(imported.clone()),
        updated: Some(imported),
        info: ApiInfo {
            title: entry.title.clone(),
            description: entry.description.clone(),
            provider_name: Some(provider),
            service_name: service,
            categories: vec![CUSTOM_PROVIDER.to_string()],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Group manifest entries into catalog entries; later imports become preferred
fn build_listing(entries: &[ManifestEntry]) -> CatalogMap {
    let mut listing = CatalogMap::new();
    for manifest_entry in entries {
        let record = version_record(manifest_entry);
        listing
            .entry(manifest_entry.catalog_key().to_string())
            .and_modify(|entry: &mut CatalogEntry| {
                entry.versions.insert(manifest_entry.version.clone(), record.clone());
                entry.preferred = manifest_entry.version.clone();
            })
            .or_insert_with(|| {
                let mut versions = BTreeMap::new();
                versions.insert(manifest_entry.version.clone(), record.clone());
                CatalogEntry::new(manifest_entry.version.clone(), versions)
            });
    }
    listing
}

#[async_trait]
impl CatalogSource for CustomSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Custom
    }

    async fn get_providers(&self) -> Result<Vec<String>> {
        self.cache
            .warm("custom:providers", Some(self.ttl.lookup()), || async {
                Ok(providers_of(&self.list_apis().await?))
            })
            .await
    }

    async fn get_provider(&self, provider: &str) -> Result<CatalogMap> {
        let apis = provider_entries(&self.list_apis().await?, provider);
        if apis.is_empty() {
            return Err(Error::not_found(format!("No custom specs for provider '{}'", provider)));
        }
        Ok(apis)
    }

    async fn get_services(&self, provider: &str) -> Result<Vec<String>> {
        let listing = self.list_apis().await?;
        if !providers_of(&listing).iter().any(|p| p == provider) {
            return Err(Error::not_found(format!("No custom specs for provider '{}'", provider)));
        }
        Ok(services_of(&listing, provider))
    }

    async fn get_api(&self, provider: &str, api: &str) -> Result<CatalogEntry> {
        entry_with_version(&self.list_apis().await?, provider, api)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("No custom spec {}:{}", provider, api)))
    }

    async fn get_service_api(&self, provider: &str, service: &str, api: &str) -> Result<CatalogEntry> {
        let key = format!("{}:{}", provider, service);
        entry_with_version(&self.list_apis().await?, &key, api)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("No custom spec {}:{}", key, api)))
    }

    async fn list_apis(&self) -> Result<CatalogMap> {
        self.cache
            .warm("custom:all_apis", Some(self.ttl.lookup()), || async {
                Ok(build_listing(&self.entries().await?))
            })
            .await
    }

    async fn get_metrics(&self) -> Result<CatalogMetrics> {
        self.cache
            .warm("custom:metrics", Some(self.ttl.lookup()), || async {
                let entries = self.entries().await?;
                let mut num_endpoints = 0u64;
                for entry in &entries {
                    match self.manifest.read_document(entry).await {
                        Ok(doc) => num_endpoints += count_operations(&doc) as u64,
                        Err(e) => warn!("Skipping endpoints of {}: {}", entry.id, e),
                    }
                }
                Ok(CatalogMetrics {
                    num_specs: entries.len() as u64,
                    num_apis: build_listing(&entries).len() as u64,
                    num_endpoints,
                    ..Default::default()
                })
            })
            .await
    }

    async fn get_openapi_spec(&self, id: &str) -> Result<Value> {
        let entry = self.find(id).await?;
        let key = format!("custom:spec:{}", entry.id);
        self.cache
            .warm(&key, Some(self.ttl.lookup()), || self.manifest.read_document(&entry))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{ContentLimits, ErrorKind};
    use tempfile::TempDir;

    const PETS_V1: &str = r#"{"openapi":"3.0.0","info":{"title":"Pets","version":"1"},"paths":{"/pets":{"get":{}}}}"#;
    const PETS_V2: &str = r#"{"openapi":"3.0.0","info":{"title":"Pets v2","version":"2"},"paths":{"/pets":{"get":{},"post":{}}}}"#;
    const SVC: &str = r#"{"openapi":"3.0.0","info":{"title":"New"},"paths":{}}"#;

    async fn custom_source(temp_dir: &TempDir) -> CustomSource {
        let manifest = ManifestStore::open(temp_dir.path().join("specs"), ContentLimits::default())
            .await
            .unwrap();
        CustomSource::new(Arc::new(manifest), Arc::new(CatalogCache::default()), TtlConfig::default())
    }

    #[tokio::test]
    async fn test_listing_uses_custom_ids() {
        let temp_dir = TempDir::new().unwrap();
        let source = custom_source(&temp_dir).await;
        source.import(ImportRequest::new("pets", "1", PETS_V1)).await.unwrap();
        source.import(ImportRequest::new("pets", "2", PETS_V2)).await.unwrap();

        let apis = source.list_apis().await.unwrap();
        assert_eq!(apis.len(), 2);
        let entry = &apis["custom:pets:2"];
        assert_eq!(entry.preferred_version().unwrap().info.title, "Pets v2");
        assert_eq!(
            entry.preferred_version().unwrap().info.provider_name.as_deref(),
            Some("custom")
        );

        assert_eq!(source.get_providers().await.unwrap(), vec!["custom"]);
        assert_eq!(source.get_services("custom").await.unwrap(), vec!["pets"]);
        assert!(source.has_api("custom:pets:1").await);
        assert!(!source.has_api("custom:pets:3").await);
        assert!(source.get_service_api("custom", "pets", "2").await.is_ok());
    }

    #[tokio::test]
    async fn test_replacing_entry_appears_under_replaced_id() {
        let temp_dir = TempDir::new().unwrap();
        let source = custom_source(&temp_dir).await;
        source
            .import(ImportRequest::new("svc", "1", SVC).replacing("p:svc"))
            .await
            .unwrap();

        let apis = source.list_apis().await.unwrap();
        assert_eq!(apis.keys().collect::<Vec<_>>(), vec!["p:svc"]);
        assert!(source.has_provider("p").await);
        assert_eq!(source.get_services("p").await.unwrap(), vec!["svc"]);

        let doc = source.get_openapi_spec("p:svc").await.unwrap();
        assert_eq!(doc["info"]["title"], "New");
    }

    #[tokio::test]
    async fn test_metrics_and_invalidation() {
        let temp_dir = TempDir::new().unwrap();
        let source = custom_source(&temp_dir).await;
        source.import(ImportRequest::new("pets", "1", PETS_V1)).await.unwrap();

        let metrics = source.get_metrics().await.unwrap();
        assert_eq!((metrics.num_specs, metrics.num_apis, metrics.num_endpoints), (1, 1, 1));

        source.import(ImportRequest::new("pets", "2", PETS_V2)).await.unwrap();
        let metrics = source.get_metrics().await.unwrap();
        assert_eq!((metrics.num_specs, metrics.num_apis, metrics.num_endpoints), (2, 2, 3));

        source.remove("custom:pets:1").await.unwrap();
        assert!(!source.has_api("custom:pets:1").await);
    }

    #[tokio::test]
    async fn test_unknown_lookups_are_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let source = custom_source(&temp_dir).await;

        assert_eq!(source.get_provider("custom").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            source.get_openapi_spec("custom:ghost:1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(!source.has_provider("custom").await);
    }
}
