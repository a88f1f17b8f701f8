//! Manifest store for locally imported specs
//!
//! Layout under the base directory:
//!
//! ```text
//! manifest.json                         {schemaVersion, specs, lastUpdated}
//! custom/<name>/<version>.json          normalized spec document
//! ```
//!
//! The index is reloaded from disk on every read so independently opened
//! stores over the same directory observe each other's writes. Writes are
//! last-writer-wins.

use chrono::{DateTime, Utc};
use op_core::validation::{
    sanitize_segment, validate_name_version, validate_path, validate_spec_content,
};
use op_core::{CatalogId, ContentLimits, Error, Result, SpecFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BLOB_DIR: &str = "custom";
pub const SCHEMA_VERSION: &str = "1.0";

/// Where an imported spec came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Url,
}

/// One imported spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// `custom:<name>:<version>`
    pub id: String,
    pub name: String,
    pub version: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub file_size_bytes: u64,
    pub original_format: SpecFormat,
    pub source_type: SourceType,
    /// Opaque result recorded by whichever scanner vetted the import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_scan_summary: Option<Value>,
    /// Catalog id this spec stands in for in merged listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

impl ManifestEntry {
    /// Key under which this spec appears in listings
    pub fn catalog_key(&self) -> &str {
        self.replaces.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestIndex {
    schema_version: String,
    #[serde(default)]
    specs: BTreeMap<String, ManifestEntry>,
    last_updated: DateTime<Utc>,
}

impl Default for ManifestIndex {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            specs: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Result of writing a spec blob
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: SpecFormat,
    pub title: String,
    pub description: Option<String>,
}

/// Counters over the current index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStats {
    pub total_specs: usize,
    pub total_size_bytes: u64,
    pub json_specs: usize,
    pub yaml_specs: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repaired: Vec<String>,
    pub failed: Vec<String>,
}

/// Everything needed to import one spec
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub name: String,
    pub version: String,
    pub content: String,
    pub source_type: SourceType,
    /// Replace an existing spec with the same name and version
    pub overwrite: bool,
    pub security_scan_summary: Option<Value>,
    pub replaces: Option<String>,
}

impl ImportRequest {
    pub fn new(name: &str, version: &str, content: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            content: content.into(),
            source_type: SourceType::File,
            overwrite: false,
            security_scan_summary: None,
            replaces: None,
        }
    }

    /// Shadow an existing catalog id, e.g. a locally patched public API
    pub fn replacing(mut self, id: &str) -> Self {
        self.replaces = Some(id.to_string());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn from_url(mut self) -> Self {
        self.source_type = SourceType::Url;
        self
    }
}

/// Persistent index of imported specs plus their blobs
pub struct ManifestStore {
    base_dir: PathBuf,
    limits: ContentLimits,
    index: RwLock<ManifestIndex>,
}

impl ManifestStore {
    /// Open (or create) a store rooted at `base_dir`
    pub async fn open(base_dir: impl Into<PathBuf>, limits: ContentLimits) -> Result<Self> {
        let base_dir = base_dir.into();
        validate_path(&base_dir)?;
        tokio::fs::create_dir_all(base_dir.join(BLOB_DIR)).await?;

        let store = Self {
            base_dir,
            limits,
            index: RwLock::new(ManifestIndex::default()),
        };
        store.reload().await?;
        debug!("Opened manifest store at {}", store.base_dir.display());
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn limits(&self) -> &ContentLimits {
        &self.limits
    }

    fn manifest_path(&self) -> PathBuf {
        self.base_dir.join(MANIFEST_FILE)
    }

    async fn read_index(&self) -> Result<ManifestIndex> {
        let path = self.manifest_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::validation(format!("Manifest {} is malformed: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ManifestIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reload the index from disk and return a copy
    async fn reload(&self) -> Result<ManifestIndex> {
        let fresh = self.read_index().await?;
        *self.index.write().await = fresh.clone();
        Ok(fresh)
    }

    async fn save(&self, index: &mut ManifestIndex) -> Result<()> {
        index.last_updated = Utc::now();
        let body = serde_json::to_string_pretty(&*index)?;

        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load, mutate and save the index under the write lock
    async fn modify<T>(&self, f: impl FnOnce(&mut ManifestIndex) -> Result<T>) -> Result<T> {
        let mut guard = self.index.write().await;
        let mut index = self.read_index().await?;
        let out = f(&mut index)?;
        self.save(&mut index).await?;
        *guard = index;
        Ok(out)
    }

    pub async fn list(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.reload().await?.specs.into_values().collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ManifestEntry>> {
        Ok(self.reload().await?.specs.remove(id))
    }

    /// Insert a new entry; fails if the id is already present
    pub async fn add(&self, entry: ManifestEntry) -> Result<()> {
        let id = entry.id.clone();
        self.modify(|index| {
            if index.specs.contains_key(&entry.id) {
                return Err(Error::validation(format!("Spec '{}' already exists", entry.id)));
            }
            index.specs.insert(entry.id.clone(), entry);
            Ok(())
        })
        .await?;
        info!("Added {} to manifest", id);
        Ok(())
    }

    /// Replace an existing entry
    pub async fn update(&self, entry: ManifestEntry) -> Result<()> {
        self.modify(|index| match index.specs.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => Err(Error::not_found(format!("Spec '{}' is not in the manifest", entry.id))),
        })
        .await
    }

    /// Remove an entry and its blob, returning the removed entry
    pub async fn remove(&self, id: &str) -> Result<Option<ManifestEntry>> {
        let removed = self.modify(|index| Ok(index.specs.remove(id))).await?;

        if let Some(entry) = &removed {
            if let Err(e) = self.delete_blob(&entry.name, &entry.version).await {
                warn!("Removed {} but could not delete its blob: {}", id, e);
            }
            info!("Removed {} from manifest", id);
        }
        Ok(removed)
    }

    /// Sanitized and validated location of a blob
    pub fn blob_path(&self, name: &str, version: &str) -> Result<PathBuf> {
        validate_name_version(name, version)?;
        let path = self
            .base_dir
            .join(BLOB_DIR)
            .join(sanitize_segment(name))
            .join(format!("{}.json", sanitize_segment(version)));
        validate_path(&path)?;
        Ok(path)
    }

    /// Validate `content` and write it as normalized JSON
    pub async fn store_blob(&self, name: &str, version: &str, content: &str) -> Result<StoredBlob> {
        let path = self.blob_path(name, version)?;
        let spec = validate_spec_content(content, &self.limits)?;

        let body = serde_json::to_string_pretty(&spec.document)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        debug!("Stored {} bytes at {}", body.len(), path.display());

        Ok(StoredBlob {
            path,
            size_bytes: body.len() as u64,
            format: spec.format,
            title: spec.title,
            description: spec.description,
        })
    }

    pub async fn read_blob(&self, name: &str, version: &str) -> Result<String> {
        let path = self.blob_path(name, version)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
                "No stored spec for {}:{}",
                name, version
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob, returning whether it existed
    pub async fn delete_blob(&self, name: &str, version: &str) -> Result<bool> {
        let path = self.blob_path(name, version)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    // Only succeeds once the directory is empty
                    let _ = tokio::fs::remove_dir(parent).await;
                }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Parsed spec document for an entry
    pub async fn read_document(&self, entry: &ManifestEntry) -> Result<Value> {
        let content = self.read_blob(&entry.name, &entry.version).await?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn stats(&self) -> Result<ManifestStats> {
        let index = self.reload().await?;
        let mut stats = ManifestStats {
            total_specs: index.specs.len(),
            last_updated: Some(index.last_updated),
            ..Default::default()
        };
        for entry in index.specs.values() {
            stats.total_size_bytes += entry.file_size_bytes;
            match entry.original_format {
                SpecFormat::Json => stats.json_specs += 1,
                SpecFormat::Yaml => stats.yaml_specs += 1,
            }
        }
        Ok(stats)
    }

    /// Check every entry against its blob. Never fails; problems are reported.
    pub async fn validate_integrity(&self) -> IntegrityReport {
        let index = match self.reload().await {
            Ok(index) => index,
            Err(e) => {
                return IntegrityReport {
                    valid: false,
                    issues: vec![format!("Manifest could not be loaded: {}", e)],
                }
            }
        };

        let mut issues = Vec::new();
        for (id, entry) in &index.specs {
            if CatalogId::parse(id).map(|c| !c.is_custom()).unwrap_or(true) {
                issues.push(format!("{}: id is not of the form custom:name:version", id));
            }
            if id != &entry.id {
                issues.push(format!("{}: entry records a different id '{}'", id, entry.id));
            }
            for (field, value) in [
                ("name", &entry.name),
                ("version", &entry.version),
                ("title", &entry.title),
            ] {
                if value.trim().is_empty() {
                    issues.push(format!("{}: required field '{}' is empty", id, field));
                }
            }

            match self.blob_size(entry).await {
                Ok(Some(actual)) if actual != entry.file_size_bytes => issues.push(format!(
                    "{}: size mismatch (recorded {}, actual {})",
                    id, entry.file_size_bytes, actual
                )),
                Ok(Some(_)) => {}
                Ok(None) => issues.push(format!("{}: spec file is missing", id)),
                Err(e) => issues.push(format!("{}: {}", id, e)),
            }
        }

        IntegrityReport {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Drop entries with bad ids or missing blobs and fix recorded sizes
    pub async fn repair_integrity(&self) -> RepairReport {
        let mut report = RepairReport::default();

        let mut index = match self.reload().await {
            Ok(index) => index,
            Err(e) => {
                report.failed.push(format!("Manifest could not be loaded: {}", e));
                return report;
            }
        };

        let ids: Vec<String> = index.specs.keys().cloned().collect();
        for id in ids {
            let Some(entry) = index.specs.get(&id).cloned() else {
                continue;
            };

            if CatalogId::parse(&id).map(|c| !c.is_custom()).unwrap_or(true) {
                index.specs.remove(&id);
                report.repaired.push(format!("Removed {}: invalid id", id));
                continue;
            }

            match self.blob_size(&entry).await {
                Ok(None) => {
                    index.specs.remove(&id);
                    report.repaired.push(format!("Removed {}: spec file is missing", id));
                }
                Ok(Some(actual)) if actual != entry.file_size_bytes => {
                    if let Some(e) = index.specs.get_mut(&id) {
                        e.file_size_bytes = actual;
                    }
                    report.repaired.push(format!(
                        "Updated size of {} from {} to {}",
                        id, entry.file_size_bytes, actual
                    ));
                }
                Ok(Some(_)) => {}
                Err(e) => report.failed.push(format!("{}: {}", id, e)),
            }
        }

        if !report.repaired.is_empty() {
            let _guard = self.index.write().await;
            if let Err(e) = self.save(&mut index).await {
                report.failed.push(format!("Could not save repaired manifest: {}", e));
            }
        }

        info!(
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "Manifest repair finished"
        );
        report
    }

    async fn blob_size(&self, entry: &ManifestEntry) -> Result<Option<u64>> {
        let path = self.blob_path(&entry.name, &entry.version)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate, store and index one spec
    pub async fn import_spec(&self, request: ImportRequest) -> Result<ManifestEntry> {
        validate_name_version(&request.name, &request.version)?;
        if request.name.contains(':') || request.version.contains(':') {
            return Err(Error::validation("Spec name and version must not contain ':'"));
        }
        let id = CatalogId::custom(&request.name, &request.version).to_string();
        if let Some(replaces) = &request.replaces {
            CatalogId::parse(replaces)?;
        }

        let path = self.blob_path(&request.name, &request.version)?;
        let index = self.reload().await?;
        for other in index.specs.values().filter(|e| e.id != id) {
            if self.blob_path(&other.name, &other.version)? == path {
                return Err(Error::validation(format!(
                    "Spec '{}' would share a stored file with '{}'",
                    id, other.id
                )));
            }
        }

        let exists = index.specs.contains_key(&id);
        if exists && !request.overwrite {
            return Err(Error::validation(format!(
                "Spec '{}' already exists; set overwrite to replace it",
                id
            )));
        }

        let blob = self
            .store_blob(&request.name, &request.version, &request.content)
            .await?;

        let entry = ManifestEntry {
            id: id.clone(),
            name: request.name,
            version: request.version,
            title: blob.title,
            description: blob.description,
            imported_at: Utc::now(),
            file_size_bytes: blob.size_bytes,
            original_format: blob.format,
            source_type: request.source_type,
            security_scan_summary: request.security_scan_summary,
            replaces: request.replaces,
        };

        self.modify(|index| {
            index.specs.insert(id.clone(), entry.clone());
            Ok(())
        })
        .await?;

        info!("Imported {} ({} bytes)", id, entry.file_size_bytes);
        Ok(entry)
    }

    /// Remove a spec by id
    pub async fn remove_spec(&self, id: &str) -> Result<ManifestEntry> {
        let parsed = CatalogId::parse(id)?;
        if !parsed.is_custom() {
            return Err(Error::validation(format!("'{}' is not a custom spec id", id)));
        }
        self.remove(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Spec '{}' is not in the manifest", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::ErrorKind;
    use tempfile::TempDir;

    const PETSTORE: &str = r#"{"openapi":"3.0.0","info":{"title":"Petstore","description":"Pets","version":"1.0.0"},"paths":{}}"#;

    async fn open_store(temp_dir: &TempDir) -> ManifestStore {
        ManifestStore::open(temp_dir.path().join("specs"), ContentLimits::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_import_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        let entry = store
            .import_spec(ImportRequest::new("petstore", "1.0.0", PETSTORE))
            .await
            .unwrap();
        assert_eq!(entry.id, "custom:petstore:1.0.0");
        assert_eq!(entry.title, "Petstore");
        assert_eq!(entry.original_format, SpecFormat::Json);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        let doc = store.read_document(&listed[0]).await.unwrap();
        assert_eq!(doc["info"]["title"], "Petstore");
    }

    #[tokio::test]
    async fn test_yaml_is_normalized_to_json() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        let yaml = "openapi: 3.0.0\ninfo:\n  title: Yaml API\n  version: '2'\npaths: {}\n";
        let entry = store
            .import_spec(ImportRequest::new("yaml-api", "2", yaml))
            .await
            .unwrap();
        assert_eq!(entry.original_format, SpecFormat::Yaml);

        let raw = store.read_blob("yaml-api", "2").await.unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["info"]["title"], "Yaml API");
    }

    #[tokio::test]
    async fn test_duplicate_import_requires_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store.import_spec(ImportRequest::new("pets", "1", PETSTORE)).await.unwrap();
        let err = store
            .import_spec(ImportRequest::new("pets", "1", PETSTORE))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        store
            .import_spec(ImportRequest::new("pets", "1", PETSTORE).overwrite(true))
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_names_sharing_a_stored_file_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store.import_spec(ImportRequest::new("my api", "1", PETSTORE)).await.unwrap();
        let other = PETSTORE.replace("Petstore", "Other");
        let err = store
            .import_spec(ImportRequest::new("my_api", "1", &other))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("custom:my api:1"), "{}", err);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        let doc = store.read_document(&listed[0]).await.unwrap();
        assert_eq!(doc["info"]["title"], "Petstore");
        assert!(store.validate_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_store_blob_rejects_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        let err = store.store_blob("../../etc", "1.0.0", PETSTORE).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = store.store_blob("name", "1.0.0", "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut blobs = std::fs::read_dir(store.base_dir().join(BLOB_DIR)).unwrap();
        assert!(blobs.next().is_none());
    }

    #[tokio::test]
    async fn test_reads_observe_other_instances() {
        let temp_dir = TempDir::new().unwrap();
        let first = open_store(&temp_dir).await;
        let second = open_store(&temp_dir).await;

        first.import_spec(ImportRequest::new("shared", "1", PETSTORE)).await.unwrap();
        assert!(second.get("custom:shared:1").await.unwrap().is_some());

        second.remove_spec("custom:shared:1").await.unwrap();
        assert!(first.list().await.unwrap().is_empty());
        assert!(!first.store_blob_exists("shared", "1"));
    }

    #[tokio::test]
    async fn test_add_and_update_contracts() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        let entry = store
            .import_spec(ImportRequest::new("pets", "1", PETSTORE))
            .await
            .unwrap();

        assert!(store.add(entry.clone()).await.is_err());

        let mut renamed = entry.clone();
        renamed.title = "Renamed".into();
        store.update(renamed).await.unwrap();
        assert_eq!(store.get(&entry.id).await.unwrap().unwrap().title, "Renamed");

        let mut missing = entry;
        missing.id = "custom:ghost:1".into();
        assert_eq!(store.update(missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_integrity_and_repair() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store.import_spec(ImportRequest::new("kept", "1", PETSTORE)).await.unwrap();
        store.import_spec(ImportRequest::new("gone", "1", PETSTORE)).await.unwrap();
        assert!(store.validate_integrity().await.valid);

        std::fs::remove_file(store.blob_path("gone", "1").unwrap()).unwrap();
        std::fs::write(store.blob_path("kept", "1").unwrap(), PETSTORE).unwrap();

        let report = store.validate_integrity().await;
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 2);

        let repair = store.repair_integrity().await;
        assert_eq!(repair.repaired.len(), 2);
        assert!(repair.failed.is_empty());
        assert!(store.validate_integrity().await.valid);
        assert_eq!(store.list().await.unwrap().len(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_specs, 1);
        assert_eq!(stats.total_size_bytes, PETSTORE.len() as u64);
    }

    impl ManifestStore {
        fn store_blob_exists(&self, name: &str, version: &str) -> bool {
            self.blob_path(name, version).map(|p| p.exists()).unwrap_or(false)
        }
    }
}
