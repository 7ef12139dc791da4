//! Immutable index generations, atomic publication, and snapshot persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chunk::{Chunk, FileId};
use crate::error::{IndexError, Result};
use crate::keyword::Bm25Index;
use crate::vector::VectorIndex;

const SNAPSHOT_VERSION: u32 = 1;

/// One indexed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub id: FileId,
    pub path: String,
    pub name: String,
    pub chunk_count: usize,
}

/// One complete, immutable index generation: vectors over leaves and
/// summaries, the leaf chunks themselves, and a keyword index over leaves.
///
/// Leaf vector positions equal chunk indices; summary vectors follow.
pub struct SearchIndex {
    vectors: VectorIndex,
    chunks: Vec<Chunk>,
    keyword: Bm25Index,
    files: Vec<IndexedFile>,
    roots: Vec<PathBuf>,
    levels: u32,
}

impl SearchIndex {
    /// Assemble a generation from built vectors and surviving chunks,
    /// deriving the file table and keyword index.
    #[must_use]
    pub fn assemble(
        vectors: VectorIndex,
        chunks: Vec<Chunk>,
        roots: Vec<PathBuf>,
        levels: u32,
    ) -> Self {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let keyword = Bm25Index::build(&texts);
        let files = derive_files(&chunks);
        Self {
            vectors,
            chunks,
            keyword,
            files,
            roots,
            levels,
        }
    }

    #[must_use]
    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    #[must_use]
    pub fn keyword(&self) -> &Bm25Index {
        &self.keyword
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn chunk_at(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    /// Number of summary levels above the leaves.
    #[must_use]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    #[must_use]
    pub fn files(&self) -> &[IndexedFile] {
        &self.files
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Persist the generation as a JSON snapshot. Written to a sibling temp
    /// file and renamed, so a crash never leaves a truncated snapshot behind.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or filesystem failure.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            vectors: &self.vectors,
            chunks: &self.chunks,
            roots: &self.roots,
            levels: self.levels,
        };
        let json = serde_json::to_vec(&snapshot)?;

        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::info!(path = %path.display(), bytes = json.len(), "snapshot saved");
        Ok(())
    }

    /// Load a generation from a snapshot. The keyword index and file table
    /// are derived from the chunks rather than stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed, or
    /// from an incompatible snapshot version.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: OwnedSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::Other(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Self::assemble(
            snapshot.vectors,
            snapshot.chunks,
            snapshot.roots,
            snapshot.levels,
        ))
    }
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: u32,
    vectors: &'a VectorIndex,
    chunks: &'a [Chunk],
    roots: &'a [PathBuf],
    levels: u32,
}

#[derive(Deserialize)]
struct OwnedSnapshot {
    version: u32,
    vectors: VectorIndex,
    chunks: Vec<Chunk>,
    roots: Vec<PathBuf>,
    levels: u32,
}

fn derive_files(chunks: &[Chunk]) -> Vec<IndexedFile> {
    let mut by_id: HashMap<FileId, IndexedFile> = HashMap::new();
    for chunk in chunks {
        by_id
            .entry(chunk.file_id)
            .or_insert_with(|| IndexedFile {
                id: chunk.file_id,
                path: chunk.file_path.clone(),
                name: chunk.file_name.clone(),
                chunk_count: 0,
            })
            .chunk_count += 1;
    }
    let mut files: Vec<IndexedFile> = by_id.into_values().collect();
    files.sort_by_key(|f| f.id);
    files
}

/// Shared slot holding the current index generation. A rebuild constructs a
/// whole new generation off to the side and publishes it here in one swap;
/// queries in flight keep the generation they started with via `Arc`.
#[derive(Default)]
pub struct IndexSlot {
    inner: RwLock<Option<Arc<SearchIndex>>>,
}

impl IndexSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the current generation.
    pub async fn publish(&self, index: Arc<SearchIndex>) {
        let mut slot = self.inner.write().await;
        *slot = Some(index);
    }

    /// The current generation, if one has been published.
    pub async fn current(&self) -> Option<Arc<SearchIndex>> {
        self.inner.read().await.clone()
    }

    pub async fn clear(&self) {
        let mut slot = self.inner.write().await;
        *slot = None;
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("file not found in index: {0}")]
    NotFound(String),
    #[error("path escapes the indexed roots: {0}")]
    OutsideRoots(String),
}

/// Name-or-path lookup over one generation's file table. All reads the agent
/// performs go through this boundary; nothing outside the indexed roots is
/// ever resolved.
pub struct FileRegistry {
    index: Arc<SearchIndex>,
}

impl FileRegistry {
    #[must_use]
    pub fn new(index: Arc<SearchIndex>) -> Self {
        Self { index }
    }

    /// Resolve `name_or_path` to an indexed file: exact path match first,
    /// then unique basename match.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no indexed file matches, or `OutsideRoots` if
    /// the argument names a path outside every indexed root.
    pub fn resolve(&self, name_or_path: &str) -> std::result::Result<&IndexedFile, RegistryError> {
        let trimmed = name_or_path.trim();
        if let Some(file) = self.index.files().iter().find(|f| f.path == trimmed) {
            return Ok(file);
        }
        let base = Path::new(trimmed)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(trimmed);
        if let Some(file) = self.index.files().iter().find(|f| f.name == base) {
            return Ok(file);
        }
        // Distinguish "outside our roots" from plain absence for absolute paths.
        let candidate = Path::new(trimmed);
        if candidate.is_absolute()
            && !self
                .index
                .roots()
                .iter()
                .any(|root| candidate.starts_with(root))
        {
            return Err(RegistryError::OutsideRoots(trimmed.to_owned()));
        }
        Err(RegistryError::NotFound(trimmed.to_owned()))
    }

    /// Full text of an indexed file, reassembled from its chunks in position
    /// order. Overlap between adjacent chunks is collapsed using char ranges.
    #[must_use]
    pub fn file_text(&self, file: &IndexedFile) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for chunk in self.index.chunks().iter().filter(|c| c.file_id == file.id) {
            let (start, _end) = chunk.char_range;
            if start >= covered {
                out.push_str(&chunk.text);
            } else {
                let skip = covered - start;
                out.extend(chunk.text.chars().skip(skip));
            }
            covered = covered.max(start + chunk.text.chars().count());
        }
        out
    }

    #[must_use]
    pub fn list(&self) -> &[IndexedFile] {
        self.index.files()
    }
}
