//! Content-addressed response cache.
//!
//! Keys are derived purely from the logical inputs (normalized query plus the
//! ordered context snippets), so the same inputs resolve to the same entry
//! across restarts. Entries are plain validated records; stored values are
//! never interpreted as anything but text.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// Content-derived cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key from a query and its retrieval context.
    ///
    /// The query is trimmed and case-folded; snippets are hashed in their
    /// given order, since retrieval order changes what a model emphasizes.
    /// Every field is length-prefixed so distinct splits of the same bytes
    /// yield distinct keys.
    #[must_use]
    pub fn derive(query: &str, context_snippets: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new();
        let normalized = query.trim().to_lowercase();
        hasher.update(&(normalized.len() as u64).to_le_bytes());
        hasher.update(normalized.as_bytes());
        for snippet in context_snippets {
            hasher.update(&(snippet.len() as u64).to_le_bytes());
            hasher.update(snippet.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    answer: String,
    created_at: u64,
    hit_count: u64,
}

impl CacheEntry {
    /// A valid entry carries a non-empty answer.
    fn is_valid(&self) -> bool {
        !self.answer.trim().is_empty()
    }
}

/// Aggregate statistics, derived on demand rather than maintained as
/// separate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_hits: u64,
}

/// In-memory response cache with optional JSON snapshot persistence.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ResponseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, counting a hit. Entries failing validation are evicted
    /// and reported as misses.
    pub async fn get(&self, key: CacheKey) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&key) {
            Some(entry) if entry.is_valid() => {
                entry.hit_count += 1;
                Some(entry.answer.clone())
            }
            Some(_) => {
                tracing::warn!(%key, "evicting invalid cache entry");
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: CacheKey, answer: String) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CacheEntry {
                answer,
                created_at: now_secs(),
                hit_count: 0,
            },
        );
    }

    /// Return the cached answer for `key`, or run `compute` and store its
    /// result. The boolean is true on a cache hit.
    ///
    /// Concurrent misses for the same key may each run `compute`; the last
    /// write wins, which is sound because identical keys imply identical
    /// inputs.
    ///
    /// # Errors
    ///
    /// Propagates the error from `compute`; nothing is stored on failure.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<(String, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(answer) = self.get(key).await {
            tracing::debug!(%key, "cache hit");
            return Ok((answer, true));
        }
        let answer = compute().await?;
        self.insert(key, answer.clone()).await;
        Ok((answer, false))
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            total_entries: entries.len(),
            total_hits: entries.values().map(|e| e.hit_count).sum(),
        }
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Persist all entries as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or filesystem failure.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let entries = self.entries.lock().await;
        let records: Vec<(String, CacheEntry)> = entries
            .iter()
            .map(|(key, entry)| (key.to_hex(), entry.clone()))
            .collect();
        drop(entries);

        let json = serde_json::to_vec(&records)
            .map_err(|e| crate::error::AgentError::Other(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| crate::error::AgentError::Other(e.to_string()))?;
        }
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| crate::error::AgentError::Other(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| crate::error::AgentError::Other(e.to_string()))?;
        Ok(())
    }

    /// Load entries from a JSON snapshot, skipping anything that fails
    /// validation. A missing file yields an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error only on an unreadable or unparseable existing file.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(crate::error::AgentError::Other(e.to_string())),
        };
        let records: Vec<(String, CacheEntry)> = serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::AgentError::Other(e.to_string()))?;

        let mut entries = HashMap::with_capacity(records.len());
        let mut skipped = 0usize;
        for (hex, entry) in records {
            let Ok(hash) = blake3::Hash::from_hex(&hex) else {
                skipped += 1;
                continue;
            };
            if !entry.is_valid() {
                skipped += 1;
                continue;
            }
            entries.insert(CacheKey(*hash.as_bytes()), entry);
        }
        if skipped > 0 {
            tracing::warn!(skipped, "dropped corrupt cache entries on load");
        }
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }
}
