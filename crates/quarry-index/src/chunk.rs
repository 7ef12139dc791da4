//! Chunk model and sentence-aware text splitting.

use serde::{Deserialize, Serialize};

/// Identifier of a leaf chunk, unique within one index generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkId(pub u64);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a source file within one index generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileId(pub u64);

/// One extracted passage of a source document. Immutable once created;
/// a reindex pass supersedes chunks rather than mutating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub file_id: FileId,
    pub file_path: String,
    pub file_name: String,
    pub text: String,
    /// Char offsets of this chunk within the extracted document text.
    pub char_range: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Splits document text into overlapping chunks along sentence boundaries.
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    #[must_use]
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    /// Split `text` into chunk strings with char ranges into the original text.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<(String, (usize, usize))> {
        if text.is_empty() {
            return Vec::new();
        }

        let sentences = split_sentences(text);
        merge_sentences(&sentences, self.config.chunk_size, self.config.chunk_overlap)
    }
}

/// Split on paragraph breaks and sentence endings followed by a space.
fn split_sentences(text: &str) -> Vec<(String, usize)> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        current.push(chars[i]);

        if chars[i] == '\n' && i + 1 < chars.len() && chars[i + 1] == '\n' {
            current.push(chars[i + 1]);
            i += 1;
            if !current.trim().is_empty() {
                sentences.push((std::mem::take(&mut current), current_start));
            } else {
                current.clear();
            }
            current_start = i + 1;
        } else if (chars[i] == '.' || chars[i] == '?' || chars[i] == '!')
            && i + 1 < chars.len()
            && chars[i + 1] == ' '
            && !current.trim().is_empty()
        {
            sentences.push((std::mem::take(&mut current), current_start));
            current_start = i + 1;
        }

        i += 1;
    }

    if !current.trim().is_empty() {
        sentences.push((current, current_start));
    }

    sentences
}

/// Merge sentences into chunks, respecting size and overlap.
fn merge_sentences(
    sentences: &[(String, usize)],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<(String, (usize, usize))> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chunk_start = 0;
    let mut window_start = 0;

    for (idx, (sentence, offset)) in sentences.iter().enumerate() {
        if !current.is_empty() && current.chars().count() + sentence.chars().count() > chunk_size {
            let end = chunk_start + current.chars().count();
            chunks.push((current.clone(), (chunk_start, end)));

            // Build overlap from recent sentences, walking backwards.
            current.clear();
            let mut overlap_len = 0;
            let mut overlap_start = idx;
            for i in (window_start..idx).rev() {
                let len = sentences[i].0.chars().count();
                if overlap_len + len > chunk_overlap {
                    break;
                }
                overlap_len += len;
                overlap_start = i;
            }
            for (s, _) in &sentences[overlap_start..idx] {
                current.push_str(s);
            }
            chunk_start = sentences[overlap_start].1;
            window_start = overlap_start;
        }

        if current.is_empty() {
            chunk_start = *offset;
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        let end = chunk_start + current.chars().count();
        chunks.push((current, (chunk_start, end)));
    }

    chunks
}
