//! Per-format text extraction into [`Chunk`]s.

use std::path::{Path, PathBuf};

use crate::chunk::{Chunk, ChunkId, FileId, SplitterConfig, TextSplitter};
use crate::error::{IndexError, Result};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "log", "rst"];

/// Whether the loader knows how to extract text from this path.
#[must_use]
pub fn is_supported(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    cfg!(feature = "pdf") && ext == "pdf"
}

/// Extract the full text of one file.
///
/// # Errors
///
/// Returns `IndexError::Extraction` for unsupported or unreadable files.
pub async fn extract_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    #[cfg(feature = "pdf")]
    if ext == "pdf" {
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text(&owned).map_err(|e| IndexError::Extraction {
                path: owned.display().to_string(),
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| IndexError::Other(format!("extraction task failed: {e}")))??;
        return Ok(text);
    }

    Err(IndexError::Extraction {
        path: path.display().to_string(),
        reason: format!("unsupported extension {ext:?}"),
    })
}

/// Walk `roots`, extract text from every supported file, and split into chunks.
///
/// Files that fail extraction are logged and skipped; the pass continues.
///
/// # Errors
///
/// Returns an error only if a root directory itself cannot be read.
pub async fn load_chunks(roots: &[PathBuf], splitter: &SplitterConfig) -> Result<Vec<Chunk>> {
    let mut files = Vec::new();
    for root in roots {
        collect_files(root, &mut files)?;
    }
    files.sort();

    let splitter = TextSplitter::new(splitter.clone());
    let mut chunks = Vec::new();
    let mut next_chunk = 0u64;

    for (file_idx, path) in files.iter().enumerate() {
        let text = match extract_text(path).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
                continue;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        for (text, char_range) in splitter.split(&text) {
            chunks.push(Chunk {
                id: ChunkId(next_chunk),
                file_id: FileId(file_idx as u64),
                file_path: path.display().to_string(),
                file_name: file_name.clone(),
                text,
                char_range,
            });
            next_chunk += 1;
        }
    }

    tracing::info!(
        files = files.len(),
        chunks = chunks.len(),
        "chunk extraction complete"
    );
    Ok(chunks)
}

fn collect_files(root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if root.is_file() {
        if is_supported(root) {
            out.push(root.to_path_buf());
        }
        return Ok(());
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if is_supported(&path) {
            out.push(path);
        }
    }
    Ok(())
}
