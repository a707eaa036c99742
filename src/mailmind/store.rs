use crate::error::MailMindError;
use crate::mailmind::hasher::digest;
use crate::mailmind::paths::MailMindPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub summary: String,
    pub timestamp: i64,
    #[serde(default)]
    pub associated_id: Option<String>,
}

/// Provider-id entries remember which body they summarized, so a recycled id
/// with different content is not served a stale summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub summary: String,
    pub content_hash: String,
    pub timestamp: i64,
}

/// A freshly computed summary and every key it should be reachable by.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub provider_id: Option<String>,
    pub content_hash: String,
    pub stable_id_hash: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryCaches {
    pub schema_version: u32,
    pub by_provider_id: BTreeMap<String, ProviderEntry>,
    pub by_content_hash: BTreeMap<String, CacheEntry>,
    pub by_stable_id_hash: BTreeMap<String, CacheEntry>,
}

impl Default for SummaryCaches {
    fn default() -> Self {
        Self {
            schema_version: 1,
            by_provider_id: BTreeMap::new(),
            by_content_hash: BTreeMap::new(),
            by_stable_id_hash: BTreeMap::new(),
        }
    }
}

fn non_empty(summary: &str) -> Option<&str> {
    if summary.is_empty() {
        None
    } else {
        Some(summary)
    }
}

impl SummaryCaches {
    pub fn stable_summary(&self, stable_id_hash: &str) -> Option<&str> {
        self.by_stable_id_hash
            .get(stable_id_hash)
            .and_then(|e| non_empty(&e.summary))
    }

    /// Only a hit when the cached entry was computed from the same body.
    pub fn provider_summary(&self, provider_id: &str, content_hash: &str) -> Option<&str> {
        self.by_provider_id
            .get(provider_id)
            .filter(|e| e.content_hash == content_hash)
            .and_then(|e| non_empty(&e.summary))
    }

    pub fn content_summary(&self, content_hash: &str) -> Option<&str> {
        self.by_content_hash
            .get(content_hash)
            .and_then(|e| non_empty(&e.summary))
    }

    pub fn backfill_stable(
        &mut self,
        stable_id_hash: &str,
        summary: &str,
        associated_id: Option<&str>,
        now: i64,
    ) -> bool {
        if self.stable_summary(stable_id_hash).is_some() {
            return false;
        }
        self.by_stable_id_hash.insert(
            stable_id_hash.to_string(),
            CacheEntry {
                summary: summary.to_string(),
                timestamp: now,
                associated_id: associated_id.map(str::to_string),
            },
        );
        true
    }

    pub fn backfill_provider(
        &mut self,
        provider_id: &str,
        content_hash: &str,
        summary: &str,
        now: i64,
    ) -> bool {
        if self.provider_summary(provider_id, content_hash).is_some() {
            return false;
        }
        self.by_provider_id.insert(
            provider_id.to_string(),
            ProviderEntry {
                summary: summary.to_string(),
                content_hash: content_hash.to_string(),
                timestamp: now,
            },
        );
        true
    }

    pub fn backfill_content(
        &mut self,
        content_hash: &str,
        summary: &str,
        associated_id: Option<&str>,
        now: i64,
    ) -> bool {
        if self.content_summary(content_hash).is_some() {
            return false;
        }
        self.by_content_hash.insert(
            content_hash.to_string(),
            CacheEntry {
                summary: summary.to_string(),
                timestamp: now,
                associated_id: associated_id.map(str::to_string),
            },
        );
        true
    }

    /// Mirror write after a model call: content hash always, provider id and
    /// digest(provider id) when the id is known, and the stable id hash when
    /// one was computed. Existing entries are overwritten.
    pub fn record(&mut self, rec: &SummaryRecord, now: i64) {
        let entry = CacheEntry {
            summary: rec.summary.clone(),
            timestamp: now,
            associated_id: rec.provider_id.clone(),
        };
        self.by_content_hash
            .insert(rec.content_hash.clone(), entry.clone());
        if let Some(provider_id) = rec.provider_id.as_deref() {
            self.by_provider_id.insert(
                provider_id.to_string(),
                ProviderEntry {
                    summary: rec.summary.clone(),
                    content_hash: rec.content_hash.clone(),
                    timestamp: now,
                },
            );
            self.by_stable_id_hash
                .insert(digest(provider_id), entry.clone());
        }
        if let Some(stable_id_hash) = rec.stable_id_hash.as_deref() {
            self.by_stable_id_hash
                .insert(stable_id_hash.to_string(), entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_provider_id.is_empty()
            && self.by_content_hash.is_empty()
            && self.by_stable_id_hash.is_empty()
    }
}

/// Whole-snapshot persistence of the three cache maps.
///
/// There is no merge: two overlapping load/mutate/save cycles can lose one
/// writer's entries. Entries are recomputable, so a lost write only costs a
/// later cache miss.
#[derive(Debug, Clone)]
pub struct CacheStore {
    file: PathBuf,
}

impl CacheStore {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    pub fn for_paths(paths: &MailMindPaths) -> Self {
        Self::new(paths.cache_file.clone())
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub async fn load(&self) -> Result<SummaryCaches> {
        let raw = match tokio::fs::read_to_string(&self.file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SummaryCaches::default());
            }
            Err(err) => {
                return Err(MailMindError::Storage(format!(
                    "failed to read {}: {err}",
                    self.file.display()
                ))
                .into());
            }
        };
        if raw.trim().is_empty() {
            return Ok(SummaryCaches::default());
        }
        let parsed: SummaryCaches = serde_json::from_str(&raw).map_err(|err| {
            MailMindError::Storage(format!("failed to parse {}: {err}", self.file.display()))
        })?;
        Ok(parsed)
    }

    pub async fn save(&self, caches: &SummaryCaches) -> Result<()> {
        let data = serde_json::to_string_pretty(caches)?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || write_atomically(&file, &data))
            .await
            .context("cache save task panicked")?
    }
}

fn write_atomically(file: &Path, data: &str) -> Result<()> {
    let parent = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage write in {}", parent.display()))?;
    tmp.write_all(data.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(file)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(())
}
