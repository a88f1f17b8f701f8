//! op-catalog: three-source API catalog client
//!
//! Answers APIs.guru-style catalog queries from three sources and merges
//! them with a fixed precedence:
//!
//! - **custom**: specs imported locally into the manifest store (highest)
//! - **secondary**: an optional second remote directory
//! - **primary**: the public directory (lowest)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CatalogAggregator                     │
//! │   fan-out + merge for collections, fallback chain for   │
//! │   point lookups, results cached under `triple:`         │
//! └─────────────────────────────────────────────────────────┘
//!        │                    │                    │
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ RemoteSource │   │ RemoteSource │   │   CustomSource     │
//! │  primary:    │   │  secondary:  │   │   custom:          │
//! │ rate limiter │   │ rate limiter │   │   ManifestStore    │
//! └──────────────┘   └──────────────┘   └────────────────────┘
//!        │                    │                    │
//! ┌─────────────────────────────────────────────────────────┐
//! │        CatalogCache (TTL + integrity hash, op-cache)    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use op_catalog::{CatalogAggregator, CatalogConfig, CatalogSource};
//!
//! let config = CatalogConfig::load_default()?;
//! let catalog = CatalogAggregator::from_config(&config).await?;
//!
//! let providers = catalog.get_providers().await?;
//! let stripe = catalog.search_apis("stripe", 1, 20).await?;
//! ```

pub mod aggregator;
pub mod config;
pub mod http;
pub mod manifest;
pub mod merge;
pub mod openapi;
pub mod rate_limit;
pub mod source;

// Re-exports
pub use aggregator::{CatalogAggregator, MAX_PAGE_LIMIT};
pub use config::{
    CacheConfig, CatalogConfig, CatalogConfigBuilder, CustomSourceConfig, RemoteSourceConfig,
    SourceAuth, TtlConfig, DEFAULT_PRIMARY_URL,
};
pub use http::{HttpFetcher, MemoryFetcher, ReqwestFetcher};
pub use manifest::{
    ImportRequest, IntegrityReport, ManifestEntry, ManifestStats, ManifestStore, RepairReport,
    SourceType,
};
pub use merge::{aggregate_metrics, merge_catalogs, merge_keyed, MetricsContribution};
pub use openapi::{
    EndpointDetails, EndpointExamples, EndpointPage, EndpointQuery, EndpointSchema, EndpointSummary,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use source::{CatalogSource, CustomSource, RemoteSource, SourceKind};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        CatalogAggregator, CatalogConfig, CatalogSource, CustomSource, ImportRequest,
        ManifestStore, RemoteSource, SourceKind,
    };
    pub use op_core::{CatalogEntry, CatalogMap, CatalogMetrics, Error, Result};
}
