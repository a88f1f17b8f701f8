//! Catalog sources
//!
//! Every source (the two remote directories, the local manifest, and the
//! aggregator itself) answers the same read-only surface.

pub mod custom;
pub mod remote;

pub use custom::CustomSource;
pub use remote::RemoteSource;

use crate::openapi::{
    self, EndpointDetails, EndpointExamples, EndpointPage, EndpointQuery, EndpointSchema,
};
use async_trait::async_trait;
use op_core::{CatalogEntry, CatalogId, CatalogMap, CatalogMetrics, Error, Result, VersionRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which catalog a source reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Primary,
    Secondary,
    Custom,
    Aggregate,
}

impl SourceKind {
    /// Cache key prefix for results produced by this source
    pub fn namespace(&self) -> &'static str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::Secondary => "secondary",
            SourceKind::Custom => "custom",
            SourceKind::Aggregate => "triple",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Read-only catalog surface
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn get_providers(&self) -> Result<Vec<String>>;

    /// All APIs of one provider, keyed by id
    async fn get_provider(&self, provider: &str) -> Result<CatalogMap>;

    async fn get_services(&self, provider: &str) -> Result<Vec<String>>;

    /// The entry with id `provider` that publishes version `api`
    async fn get_api(&self, provider: &str, api: &str) -> Result<CatalogEntry>;

    /// The entry with id `provider:service` that publishes version `api`
    async fn get_service_api(&self, provider: &str, service: &str, api: &str) -> Result<CatalogEntry>;

    async fn list_apis(&self) -> Result<CatalogMap>;

    async fn get_metrics(&self) -> Result<CatalogMetrics>;

    /// The raw OpenAPI/Swagger document for an id
    async fn get_openapi_spec(&self, id: &str) -> Result<Value>;

    /// Never fails; any error reads as absent.
    async fn has_provider(&self, provider: &str) -> bool {
        match self.get_providers().await {
            Ok(providers) => providers.iter().any(|p| p == provider),
            Err(_) => false,
        }
    }

    /// Never fails; any error reads as absent.
    async fn has_api(&self, id: &str) -> bool {
        let Ok(id) = CatalogId::parse(id) else {
            return false;
        };
        match self.list_apis().await {
            Ok(apis) => lookup_entry(&apis, &id).is_some(),
            Err(_) => false,
        }
    }

    async fn get_api_endpoints(&self, id: &str, query: &EndpointQuery) -> Result<EndpointPage> {
        let doc = self.get_openapi_spec(id).await?;
        Ok(openapi::list_endpoints(&doc, query))
    }

    async fn get_endpoint_details(&self, id: &str, method: &str, path: &str) -> Result<EndpointDetails> {
        let doc = self.get_openapi_spec(id).await?;
        openapi::endpoint_details(&doc, method, path)
    }

    async fn get_endpoint_schema(&self, id: &str, method: &str, path: &str) -> Result<EndpointSchema> {
        let doc = self.get_openapi_spec(id).await?;
        openapi::endpoint_schema(&doc, method, path)
    }

    async fn get_endpoint_examples(&self, id: &str, method: &str, path: &str) -> Result<EndpointExamples> {
        let doc = self.get_openapi_spec(id).await?;
        openapi::endpoint_examples(&doc, method, path)
    }
}

/// Entry `key` if it publishes `version`, else the entry keyed `key:version`
pub fn entry_with_version<'a>(map: &'a CatalogMap, key: &str, version: &str) -> Option<&'a CatalogEntry> {
    map.get(key)
        .filter(|entry| entry.versions.contains_key(version))
        .or_else(|| map.get(&format!("{}:{}", key, version)))
}

/// Resolve a parsed id against a listing.
///
/// `provider:x` is first read as a service id and then as provider plus
/// version, matching how the directories name unversioned providers.
pub fn lookup_entry<'a>(map: &'a CatalogMap, id: &CatalogId) -> Option<&'a CatalogEntry> {
    match (&id.service, &id.version) {
        (None, _) => map.get(&id.provider),
        (Some(service), None) => map
            .get(&id.base())
            .or_else(|| entry_with_version(map, &id.provider, service)),
        (Some(_), Some(version)) => entry_with_version(map, &id.base(), version),
    }
}

/// The version record an id points at, falling back to the preferred one
pub fn select_version<'a>(entry: &'a CatalogEntry, id: &CatalogId) -> Option<&'a VersionRecord> {
    id.version
        .as_ref()
        .or(id.service.as_ref())
        .and_then(|v| entry.versions.get(v))
        .or_else(|| entry.preferred_version())
}

/// Providers present in a listing, sorted
pub fn providers_of(map: &CatalogMap) -> Vec<String> {
    let mut providers: Vec<String> = map
        .keys()
        .filter_map(|key| CatalogId::parse(key).ok())
        .map(|id| id.provider)
        .collect();
    providers.sort();
    providers.dedup();
    providers
}

/// Entries of one provider
pub fn provider_entries(map: &CatalogMap, provider: &str) -> CatalogMap {
    map.iter()
        .filter(|(key, _)| key.split(':').next() == Some(provider))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect()
}

/// Services of one provider, sorted
pub fn services_of(map: &CatalogMap, provider: &str) -> Vec<String> {
    let mut services: Vec<String> = map
        .keys()
        .filter_map(|key| CatalogId::parse(key).ok())
        .filter(|id| id.provider == provider)
        .filter_map(|id| id.service)
        .collect();
    services.sort();
    services.dedup();
    services
}

/// Reject path segments that could escape the directory layout
pub fn validate_segment<'a>(what: &str, segment: &'a str) -> Result<&'a str> {
    if segment.trim().is_empty()
        || segment == "."
        || segment.contains("..")
        || segment.contains(&['/', '\\', '?', '#'][..])
    {
        return Err(Error::validation(format!("Invalid {} '{}'", what, segment)));
    }
    Ok(segment)
}
