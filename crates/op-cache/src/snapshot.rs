//! Snapshot persistence for warm starts
//!
//! A snapshot is one JSON document holding every live record together with
//! its remaining TTL at save time. Restoring subtracts the time spent on disk.

use crate::record::CacheRecord;
use crate::store::CatalogCache;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    saved_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry {
    key: String,
    remaining_ms: u64,
    record: Value,
}

impl CatalogCache {
    /// Write every live entry to `path`, returning how many were saved
    pub async fn snapshot(&self, path: &Path) -> Result<usize> {
        self.evict_expired().await;
        let entries: Vec<SnapshotEntry> = {
            let slots = self.entries.read().await;
            slots
                .iter()
                .filter(|(_, slot)| !slot.remaining().is_zero())
                .filter_map(|(key, slot)| {
                    let record = serde_json::from_str::<Value>(&slot.raw).ok()?;
                    Some(SnapshotEntry {
                        key: key.clone(),
                        remaining_ms: slot.remaining().as_millis() as u64,
                        record,
                    })
                })
                .collect()
        };

        let count = entries.len();
        let file = SnapshotFile {
            saved_at: Utc::now(),
            entries,
        };
        let body = serde_json::to_vec(&file).context("Failed to encode cache snapshot")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path).await?;

        info!("Saved {} cache entries to {}", count, path.display());
        Ok(count)
    }

    /// Load entries from a snapshot written by [`CatalogCache::snapshot`].
    ///
    /// Wrapped records must still verify; legacy bare values are re-wrapped.
    /// Expired or corrupt entries are skipped. Returns how many were restored.
    pub async fn restore(&self, path: &Path) -> Result<usize> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: SnapshotFile =
            serde_json::from_slice(&body).context("Cache snapshot is malformed")?;

        let offline = (Utc::now() - file.saved_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut restored = 0;
        for entry in file.entries {
            let remaining = Duration::from_millis(entry.remaining_ms).saturating_sub(offline);
            if remaining.is_zero() {
                debug!(key = %entry.key, "Skipping expired snapshot entry");
                continue;
            }

            let record: CacheRecord = match serde_json::from_value(entry.record) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Skipping unreadable snapshot entry");
                    continue;
                }
            };

            let wrapped = match record {
                CacheRecord::Legacy(value) => CacheRecord::wrap(value),
                wrapped => wrapped,
            };
            if let Err(corruption) = wrapped.clone().into_verified() {
                warn!(key = %entry.key, %corruption, "Skipping corrupt snapshot entry");
                continue;
            }

            let raw = serde_json::to_string(&wrapped)?;
            self.insert_raw(entry.key, raw, remaining).await;
            restored += 1;
        }

        info!("Restored {} cache entries from {}", restored, path.display());
        Ok(restored)
    }
}
