//! Catalog data model shared by every source and the aggregator
//!
//! Field names follow the APIs.guru v2 wire format so that remote payloads
//! deserialize directly. Unknown fields are carried through untouched; a
//! higher-precedence source replaces a whole entry and the caller must see
//! exactly what that source returned.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Provider name used for every locally imported spec
pub const CUSTOM_PROVIDER: &str = "custom";

/// All APIs of one source, keyed by catalog id
pub type CatalogMap = BTreeMap<String, CatalogEntry>;

/// One logical API with one or more versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Key of the preferred version in `versions`
    pub preferred: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogEntry {
    pub fn new(preferred: impl Into<String>, versions: BTreeMap<String, VersionRecord>) -> Self {
        Self {
            preferred: preferred.into(),
            versions,
            extra: Map::new(),
        }
    }

    /// The preferred version record, `None` when the preferred key dangles.
    pub fn preferred_version(&self) -> Option<&VersionRecord> {
        self.versions.get(&self.preferred)
    }

    /// An entry is valid only when its preferred key names a version.
    pub fn is_valid(&self) -> bool {
        self.preferred_version().is_some()
    }
}

/// One published version of an API
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(
        rename = "swaggerUrl",
        alias = "specUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spec_url: Option<String>,
    #[serde(
        rename = "swaggerYamlUrl",
        alias = "specYamlUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spec_yaml_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi_ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub info: ApiInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `info` block of a version record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "x-providerName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_name: Option<String>,
    #[serde(
        rename = "x-serviceName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_name: Option<String>,
    #[serde(
        rename = "x-apisguru-categories",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub categories: Vec<String>,
    #[serde(rename = "x-popularity", default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parsed form of `provider:service[:version]` or `custom:name:version`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogId {
    pub provider: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl CatalogId {
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split(':').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::validation(format!("Malformed catalog id '{}'", id)));
        }

        let id = Self {
            provider: parts[0].to_string(),
            service: parts.get(1).map(|s| s.to_string()),
            version: parts.get(2).map(|s| s.to_string()),
        };

        if id.is_custom() && (id.service.is_none() || id.version.is_none()) {
            return Err(Error::validation(format!(
                "Custom ids must look like custom:name:version, got '{}'",
                id
            )));
        }
        Ok(id)
    }

    /// Build the id of a locally imported spec
    pub fn custom(name: &str, version: &str) -> Self {
        Self {
            provider: CUSTOM_PROVIDER.to_string(),
            service: Some(name.to_string()),
            version: Some(version.to_string()),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.provider == CUSTOM_PROVIDER
    }

    /// The id without its version segment, i.e. the key used in listings
    pub fn base(&self) -> String {
        match &self.service {
            Some(service) => format!("{}:{}", self.provider, service),
            None => self.provider.clone(),
        }
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.provider)?;
        if let Some(service) = &self.service {
            write!(f, ":{}", service)?;
        }
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// Additive catalog counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetrics {
    #[serde(rename = "numSpecs", default)]
    pub num_specs: u64,
    #[serde(rename = "numAPIs", default)]
    pub num_apis: u64,
    #[serde(rename = "numEndpoints", default)]
    pub num_endpoints: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Flattened view of one entry used by listings and search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub provider: String,
    pub preferred_version: String,
    pub categories: Vec<String>,
    pub updated: Option<String>,
    pub popularity: Option<f64>,
}

impl ApiSummary {
    pub fn from_entry(id: &str, entry: &CatalogEntry) -> Self {
        let record = entry.preferred_version();
        let info = record.map(|r| &r.info);
        let provider = info
            .and_then(|i| i.provider_name.clone())
            .unwrap_or_else(|| id.split(':').next().unwrap_or(id).to_string());

        Self {
            id: id.to_string(),
            title: info
                .map(|i| i.title.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| id.to_string()),
            description: info.and_then(|i| i.description.clone()),
            provider,
            preferred_version: entry.preferred.clone(),
            categories: info.map(|i| i.categories.clone()).unwrap_or_default(),
            updated: record.and_then(|r| r.updated.clone()),
            popularity: info.and_then(|i| i.popularity),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total_results: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub pagination: Pagination,
}

impl<T: Clone> Page<T> {
    /// Slice `items` into a 1-based page. `page` and `limit` are clamped to at least 1.
    pub fn paginate(items: &[T], page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total_results = items.len();
        let total_pages = total_results.div_ceil(limit);
        let start = (page - 1).saturating_mul(limit).min(total_results);
        let end = (start + limit).min(total_results);

        Self {
            results: items[start..end].to_vec(),
            pagination: Pagination {
                page,
                limit,
                total_results,
                total_pages,
                has_next: page < total_pages,
                has_previous: page > 1,
            },
        }
    }
}

/// Paginated API summaries
pub type ApiPage = Page<ApiSummary>;

/// Catalog overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    pub total_apis: usize,
    pub total_providers: usize,
    pub top_categories: Vec<CategoryCount>,
    pub recently_updated: Vec<ApiSummary>,
    pub metrics: CatalogMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_roundtrips_unknown_fields() {
        let raw = json!({
            "added": "2020-01-01T00:00:00.000Z",
            "preferred": "1.0",
            "versions": {
                "1.0": {
                    "swaggerUrl": "https://example.test/spec.json",
                    "info": { "title": "Demo", "x-logo": { "url": "x" } },
                    "x-extra": 1
                }
            }
        });

        let entry: CatalogEntry = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entry.preferred_version().unwrap().info.title, "Demo");
        assert_eq!(
            entry.preferred_version().unwrap().spec_url.as_deref(),
            Some("https://example.test/spec.json")
        );
        assert_eq!(serde_json::to_value(&entry).unwrap(), raw);
    }

    #[test]
    fn test_dangling_preferred_is_unknown_version() {
        let entry = CatalogEntry::new("2.0", BTreeMap::new());
        assert!(entry.preferred_version().is_none());
        assert!(!entry.is_valid());

        let summary = ApiSummary::from_entry("acme.io", &entry);
        assert_eq!(summary.title, "acme.io");
        assert_eq!(summary.provider, "acme.io");
    }

    #[test]
    fn test_catalog_id_parse() {
        let id = CatalogId::parse("googleapis.com:drive:v3").unwrap();
        assert_eq!(id.provider, "googleapis.com");
        assert_eq!(id.service.as_deref(), Some("drive"));
        assert_eq!(id.version.as_deref(), Some("v3"));
        assert_eq!(id.base(), "googleapis.com:drive");
        assert_eq!(id.to_string(), "googleapis.com:drive:v3");

        assert!(CatalogId::parse("xkcd.com").is_ok());
        assert!(CatalogId::parse("a:b:c:d").is_err());
        assert!(CatalogId::parse("a::c").is_err());
        assert!(CatalogId::parse("custom:only-name").is_err());
        assert!(CatalogId::parse("custom:pets:1.0.0").unwrap().is_custom());
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u32> = (1..=7).collect();
        let page = Page::paginate(&items, 2, 3);
        assert_eq!(page.results, vec![4, 5, 6]);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_next);
        assert!(page.pagination.has_previous);

        let past_end = Page::paginate(&items, 9, 3);
        assert!(past_end.results.is_empty());
        assert!(!past_end.pagination.has_next);
    }
}
