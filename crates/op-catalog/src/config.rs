//! Configuration for the catalog client
//!
//! Supports loading from JSON/YAML files, with environment overrides for the
//! settings operators change most often.

use crate::rate_limit::RateLimitConfig;
use anyhow::{Context, Result};
use op_cache::CacheOptions;
use op_core::config::{get_config_bool, get_config_opt};
use op_core::ContentLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default base URL of the primary directory
pub const DEFAULT_PRIMARY_URL: &str = "https://api.apis.guru/v2";

/// Main configuration for the catalog client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Public API directory
    #[serde(default = "RemoteSourceConfig::primary")]
    pub primary: RemoteSourceConfig,

    /// Enhanced directory with the same layout
    #[serde(default = "RemoteSourceConfig::secondary")]
    pub secondary: RemoteSourceConfig,

    /// Locally imported specs
    #[serde(default)]
    pub custom: CustomSourceConfig,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-operation TTLs for aggregate results
    #[serde(default)]
    pub ttl: TtlConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            primary: RemoteSourceConfig::primary(),
            secondary: RemoteSourceConfig::secondary(),
            custom: CustomSourceConfig::default(),
            cache: CacheConfig::default(),
            ttl: TtlConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
            serde_yaml::from_str(&content).with_context(|| "Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).with_context(|| "Failed to parse JSON config")?
        };

        info!("Loaded catalog config from {}", path.display());
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `OP_CATALOG_CONFIG` or the default paths, with fallbacks
    pub fn load_default() -> Result<Self> {
        if let Some(path) = get_config_opt("OP_CATALOG_CONFIG") {
            return Self::load(path);
        }

        let paths = ["/etc/op-catalog/catalog.json", "catalog.json"];
        for path in paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        info!("No catalog config found, using defaults");
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no source could run with
    pub fn validate(&self) -> Result<()> {
        for (name, source) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            source
                .rate_limit
                .validate()
                .with_context(|| format!("Invalid {} source rate limit", name))?;
        }
        Ok(())
    }

    /// Apply `OP_CATALOG_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = get_config_opt("OP_CATALOG_PRIMARY_URL") {
            self.primary.base_url = url;
        }
        if let Some(url) = get_config_opt("OP_CATALOG_SECONDARY_URL") {
            self.secondary.base_url = url;
            self.secondary.enabled = true;
        }
        if let Some(dir) = get_config_opt("OP_CATALOG_CUSTOM_DIR") {
            self.custom.manifest_dir = PathBuf::from(dir);
        }
        self.cache.enabled = get_config_bool("OP_CATALOG_CACHE_ENABLED", self.cache.enabled);
        self
    }

    /// Create a builder for programmatic configuration
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }
}

/// Builder for CatalogConfig
#[derive(Default)]
pub struct CatalogConfigBuilder {
    config: CatalogConfig,
}

impl CatalogConfigBuilder {
    pub fn primary(mut self, source: RemoteSourceConfig) -> Self {
        self.config.primary = source;
        self
    }

    pub fn secondary(mut self, source: RemoteSourceConfig) -> Self {
        self.config.secondary = source;
        self
    }

    pub fn manifest_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.custom.manifest_dir = dir.into();
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn ttl(mut self, ttl: TtlConfig) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn build(self) -> CatalogConfig {
        self.config
    }
}

/// Configuration for a remote directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSourceConfig {
    /// Whether this source is consulted at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL, without trailing slash
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Outbound request budget
    pub rate_limit: RateLimitConfig,

    /// Optional authentication
    #[serde(default)]
    pub auth: Option<SourceAuth>,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl RemoteSourceConfig {
    pub fn new(base_url: &str, rate_limit: RateLimitConfig) -> Self {
        Self {
            enabled: true,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: default_timeout(),
            rate_limit,
            auth: None,
        }
    }

    pub fn primary() -> Self {
        Self::new(DEFAULT_PRIMARY_URL, RateLimitConfig::primary())
    }

    /// The secondary directory has no public default and stays off until configured
    pub fn secondary() -> Self {
        Self {
            enabled: false,
            ..Self::new("", RateLimitConfig::secondary())
        }
    }

    pub fn with_auth(mut self, auth: SourceAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Join a path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Authentication configuration for remote directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceAuth {
    /// Bearer token authentication
    Bearer {
        /// Token value (can be env var reference like ${APIS_TOKEN})
        token: String,
    },
    /// Basic authentication
    Basic { username: String, password: String },
    /// Custom header
    Header { name: String, value: String },
}

impl SourceAuth {
    /// Resolve environment variable references in auth values
    pub fn resolve(&self) -> Self {
        match self {
            Self::Bearer { token } => Self::Bearer {
                token: resolve_env_var(token),
            },
            Self::Basic { username, password } => Self::Basic {
                username: resolve_env_var(username),
                password: resolve_env_var(password),
            },
            Self::Header { name, value } => Self::Header {
                name: name.clone(),
                value: resolve_env_var(value),
            },
        }
    }
}

/// Resolve environment variable references like ${VAR_NAME}
fn resolve_env_var(value: &str) -> String {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

/// Local spec directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomSourceConfig {
    /// Directory holding `manifest.json` and the `custom/` blobs
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,

    /// Accepted spec sizes
    #[serde(default)]
    pub limits: ContentLimits,
}

fn default_manifest_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("op-catalog")
        .join("custom-specs")
}

impl Default for CustomSourceConfig {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            limits: ContentLimits::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global on/off switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cached entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL for entries stored without an explicit one (seconds)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Where to save and restore a warm-start snapshot
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_max_entries() -> usize {
    op_cache::store::DEFAULT_MAX_ENTRIES
}

fn default_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            enabled: self.enabled,
            max_entries: self.max_entries,
            default_ttl: Duration::from_secs(self.default_ttl_secs),
        }
    }
}

/// TTLs for aggregate and per-source results (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub providers_secs: u64,
    pub all_apis_secs: u64,
    pub services_secs: u64,
    pub provider_secs: u64,
    pub metrics_secs: u64,
    pub listing_secs: u64,
    pub summary_secs: u64,
    pub lookup_secs: u64,
}

const DAY: u64 = 24 * 60 * 60;

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            providers_secs: DAY,
            all_apis_secs: DAY,
            services_secs: DAY,
            provider_secs: DAY,
            metrics_secs: 10 * 60,
            listing_secs: 5 * 60,
            summary_secs: 10 * 60,
            lookup_secs: 10 * 60,
        }
    }
}

impl TtlConfig {
    pub fn providers(&self) -> Duration {
        Duration::from_secs(self.providers_secs)
    }

    pub fn all_apis(&self) -> Duration {
        Duration::from_secs(self.all_apis_secs)
    }

    pub fn services(&self) -> Duration {
        Duration::from_secs(self.services_secs)
    }

    pub fn provider(&self) -> Duration {
        Duration::from_secs(self.provider_secs)
    }

    pub fn metrics(&self) -> Duration {
        Duration::from_secs(self.metrics_secs)
    }

    /// Search, paginated, popular and recently-updated listings
    pub fn listing(&self) -> Duration {
        Duration::from_secs(self.listing_secs)
    }

    pub fn summary(&self) -> Duration {
        Duration::from_secs(self.summary_secs)
    }

    /// Single API, spec and endpoint lookups
    pub fn lookup(&self) -> Duration {
        Duration::from_secs(self.lookup_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CatalogConfig::default();
        assert!(config.primary.enabled);
        assert_eq!(config.primary.base_url, DEFAULT_PRIMARY_URL);
        assert_eq!(config.primary.rate_limit, RateLimitConfig::new(100, 60_000));
        assert!(!config.secondary.enabled);
        assert_eq!(config.secondary.rate_limit, RateLimitConfig::new(50, 60_000));
        assert_eq!(config.ttl.providers(), Duration::from_secs(DAY));
        assert_eq!(config.ttl.listing(), Duration::from_secs(300));
    }

    #[test]
    fn test_resolve_env_var() {
        std::env::set_var("OP_CATALOG_TEST_TOKEN", "secret123");
        assert_eq!(resolve_env_var("${OP_CATALOG_TEST_TOKEN}"), "secret123");
        assert_eq!(resolve_env_var("plain_value"), "plain_value");
        assert_eq!(resolve_env_var("${OP_CATALOG_UNSET_VAR}"), "${OP_CATALOG_UNSET_VAR}");
        std::env::remove_var("OP_CATALOG_TEST_TOKEN");
    }

    #[test]
    fn test_url_join() {
        let source = RemoteSourceConfig::new("https://example.test/v2/", RateLimitConfig::primary());
        assert_eq!(source.url("/providers.json"), "https://example.test/v2/providers.json");
        assert_eq!(source.url("list.json"), "https://example.test/v2/list.json");
    }

    #[test]
    fn test_load_yaml_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            r#"
primary:
  base_url: https://mirror.example.test/v2
  rate_limit: { max_requests: 10, window_ms: 1000 }
  auth: { type: bearer, token: abc }
cache:
  enabled: false
ttl:
  metrics_secs: 30
"#,
        )
        .unwrap();

        let config = CatalogConfig::load(&path).unwrap();
        assert_eq!(config.primary.base_url, "https://mirror.example.test/v2");
        assert_eq!(config.primary.rate_limit.max_requests, 10);
        assert!(matches!(config.primary.auth, Some(SourceAuth::Bearer { .. })));
        assert!(!config.secondary.enabled);
        assert_eq!(config.ttl.metrics(), Duration::from_secs(30));
        assert_eq!(config.ttl.lookup(), Duration::from_secs(600));
    }

    #[test]
    fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"custom": {"manifest_dir": "/tmp/specs", "limits": {"min_bytes": 1, "max_bytes": 2048}}}"#,
        )
        .unwrap();

        let config = CatalogConfig::load(&path).unwrap();
        assert_eq!(config.custom.limits.max_bytes, 2048);
        assert!(config.primary.enabled);
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"secondary": {"base_url": "https://mirror.test/v2", "rate_limit": {"max_requests": 0, "window_ms": 1000}}}"#,
        )
        .unwrap();

        let err = CatalogConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("secondary"), "{:#}", err);
    }

    #[test]
    fn test_config_builder() {
        let config = CatalogConfig::builder()
            .primary(RemoteSourceConfig::new("http://localhost:3001", RateLimitConfig::new(5, 100)))
            .secondary(RemoteSourceConfig::new("http://localhost:3002", RateLimitConfig::new(2, 100)))
            .manifest_dir("/tmp/op-catalog-specs")
            .cache_enabled(false)
            .build();

        assert_eq!(config.primary.url("x.json"), "http://localhost:3001/x.json");
        assert!(config.secondary.enabled);
        assert_eq!(config.custom.manifest_dir, PathBuf::from("/tmp/op-catalog-specs"));
        assert!(!config.cache.options().enabled);
    }
}
