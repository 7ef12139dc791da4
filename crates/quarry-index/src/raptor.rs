//! Hierarchical summarization index builder: embed → cluster → summarize, recursively.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use quarry_llm::{LlmError, LlmProvider};

use crate::chunk::{Chunk, ChunkId};
use crate::cluster::cluster_level;
pub use crate::cluster::ClusterParams;
use crate::error::{IndexError, Result};
use crate::progress::{Phase, ProgressSink, report};
use crate::store::SearchIndex;
use crate::vector::{EmbeddingRecord, SourceKind, VectorIndex};

#[derive(Debug, Clone)]
pub struct RaptorConfig {
    /// Maximum summary levels above the leaves.
    pub max_levels: u32,
    /// Stop recursing once a level has this many nodes or fewer.
    pub root_threshold: usize,
    pub cluster: ClusterParams,
    /// Length bound for generated and fallback summaries.
    pub summary_max_chars: usize,
    /// Concurrent embedding calls during the leaf phase.
    pub embed_concurrency: usize,
}

impl Default for RaptorConfig {
    fn default() -> Self {
        Self {
            max_levels: 4,
            root_threshold: 2,
            cluster: ClusterParams::default(),
            summary_max_chars: 1200,
            embed_concurrency: 5,
        }
    }
}

/// Condenses a cluster's member texts into one summary.
pub trait Summarizer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if summary generation fails; the builder falls back to
    /// truncated concatenation rather than aborting.
    fn summarize(&self, texts: &[String]) -> impl Future<Output = std::result::Result<String, LlmError>> + Send;
}

/// LLM-backed abstractive summarizer.
pub struct LlmSummarizer<P: LlmProvider> {
    provider: Arc<P>,
}

impl<P: LlmProvider> LlmSummarizer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

fn build_summary_prompt(texts: &[String]) -> String {
    let mut prompt = String::from(
        "Condense the following passages into one concise summary. Preserve key facts, \
         names, dates, and figures. Be brief.\n\nPassages:\n",
    );
    for text in texts {
        prompt.push_str(text);
        prompt.push_str("\n---\n");
    }
    prompt.push_str("\nSummary:");
    prompt
}

impl<P: LlmProvider> Summarizer for LlmSummarizer<P> {
    async fn summarize(&self, texts: &[String]) -> std::result::Result<String, LlmError> {
        let prompt = build_summary_prompt(texts);
        self.provider
            .chat(&[quarry_llm::provider::Message::user(prompt)])
            .await
    }
}

/// Deterministic extractive fallback: leading sentence of each member, bounded.
///
/// Keeps indexing latency acceptable when no generative provider is configured.
pub struct ExtractiveSummarizer {
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_chars: 1200 }
    }
}

fn leading_sentence(text: &str) -> &str {
    let trimmed = text.trim_start();
    for (i, c) in trimmed.char_indices() {
        if (c == '.' || c == '?' || c == '!') && i > 0 {
            return &trimmed[..=i];
        }
        if c == '\n' {
            return trimmed[..i].trim_end();
        }
    }
    trimmed
}

impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, texts: &[String]) -> std::result::Result<String, LlmError> {
        let mut out = String::new();
        for text in texts {
            let sentence = leading_sentence(text);
            if out.chars().count() + sentence.chars().count() > self.max_chars {
                break;
            }
            out.push_str(sentence);
            out.push(' ');
        }
        Ok(out.trim_end().to_owned())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

struct LevelNode {
    text: String,
    embedding: Vec<f32>,
    chunk_ids: BTreeSet<ChunkId>,
}

/// Builds the full index over a chunk set. Batch-only: any chunk set change
/// requires a rebuild, because tree shape depends on all sibling content.
pub struct RaptorBuilder<P: LlmProvider, S: Summarizer> {
    provider: Arc<P>,
    summarizer: S,
    config: RaptorConfig,
    progress: Option<ProgressSink>,
}

impl<P: LlmProvider, S: Summarizer> RaptorBuilder<P, S> {
    #[must_use]
    pub fn new(provider: Arc<P>, summarizer: S, config: RaptorConfig) -> Self {
        Self {
            provider,
            summarizer,
            config,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Build a complete index generation from `chunks`.
    ///
    /// Individual embedding failures exclude that node and continue; summary
    /// generation failures degrade to truncated concatenation. The returned
    /// index is internally consistent even when branches are degraded.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBuild` if no chunk could be embedded, or an error if the
    /// vector store rejects mismatched dimensions.
    pub async fn build(&self, chunks: Vec<Chunk>, roots: Vec<PathBuf>) -> Result<SearchIndex> {
        let (leaves, kept_chunks) = self.embed_leaves(chunks).await;
        if leaves.is_empty() {
            return Err(IndexError::EmptyBuild);
        }

        let mut vectors = VectorIndex::new();
        for (node, chunk) in leaves.iter().zip(&kept_chunks) {
            vectors.push(
                node.embedding.clone(),
                EmbeddingRecord {
                    kind: SourceKind::Leaf,
                    level: 0,
                    chunk_ids: BTreeSet::from([chunk.id]),
                },
            )?;
        }

        let levels = self.build_summary_levels(leaves, &mut vectors).await?;

        report(self.progress.as_ref(), Phase::Finalizing, 0, 1);
        let index = SearchIndex::assemble(vectors, kept_chunks, roots, levels);
        report(self.progress.as_ref(), Phase::Finalizing, 1, 1);

        tracing::info!(
            leaves = index.chunk_count(),
            total_nodes = index.vector_count(),
            levels,
            "index build complete"
        );
        Ok(index)
    }

    /// Embed all leaf chunks with bounded concurrency, preserving chunk order.
    async fn embed_leaves(&self, chunks: Vec<Chunk>) -> (Vec<LevelNode>, Vec<Chunk>) {
        let total = chunks.len();
        report(self.progress.as_ref(), Phase::Embedding, 0, total);

        let provider = Arc::clone(&self.provider);
        let mut results: Vec<(usize, std::result::Result<Vec<f32>, LlmError>)> =
            futures::stream::iter(chunks.iter().enumerate().map(|(i, chunk)| {
                let provider = Arc::clone(&provider);
                let text = chunk.text.clone();
                async move { (i, provider.embed(&text).await) }
            }))
            .buffer_unordered(self.config.embed_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        let mut nodes = Vec::new();
        let mut kept = Vec::new();
        for ((i, result), chunk) in results.into_iter().zip(chunks) {
            report(self.progress.as_ref(), Phase::Embedding, i + 1, total);
            match result {
                Ok(embedding) => {
                    nodes.push(LevelNode {
                        text: chunk.text.clone(),
                        embedding,
                        chunk_ids: BTreeSet::from([chunk.id]),
                    });
                    kept.push(chunk);
                }
                Err(e) => {
                    tracing::warn!("embedding failed for chunk {}: {e}", chunk.id);
                }
            }
        }
        (nodes, kept)
    }

    /// Recursively cluster and summarize until the root threshold or level cap.
    /// Returns the number of summary levels created.
    async fn build_summary_levels(
        &self,
        mut nodes: Vec<LevelNode>,
        vectors: &mut VectorIndex,
    ) -> Result<u32> {
        // Upper-bound estimate keeps the reported fraction monotonic across levels.
        let summary_estimate = nodes.len();
        let mut summaries_done = 0;
        let mut level = 0u32;

        while nodes.len() > self.config.root_threshold && level < self.config.max_levels {
            // Upper levels are tiny; only the leaf-level pass is worth reporting.
            if level == 0 {
                report(self.progress.as_ref(), Phase::Clustering, 0, 1);
            }
            let embeddings: Vec<Vec<f32>> =
                nodes.iter().map(|n| n.embedding.clone()).collect();
            let clusters = cluster_level(&embeddings, self.config.cluster);
            if level == 0 {
                report(self.progress.as_ref(), Phase::Clustering, 1, 1);
            }

            // All singletons: no grouping is possible, stop instead of looping.
            if clusters.len() == nodes.len() {
                break;
            }

            level += 1;
            let mut next: Vec<LevelNode> = Vec::with_capacity(clusters.len());

            for members in clusters {
                if members.len() == 1 {
                    // No acceptable neighbor: promote unchanged, no synthetic summary.
                    next.push(take_node(&mut nodes, members[0]));
                    continue;
                }

                let texts: Vec<String> =
                    members.iter().map(|&m| nodes[m].text.clone()).collect();
                let chunk_ids: BTreeSet<ChunkId> = members
                    .iter()
                    .flat_map(|&m| nodes[m].chunk_ids.iter().copied())
                    .collect();

                let summary = match self.summarizer.summarize(&texts).await {
                    Ok(s) if !s.trim().is_empty() => truncate_chars(&s, self.config.summary_max_chars),
                    Ok(_) | Err(_) => {
                        tracing::warn!(
                            level,
                            members = texts.len(),
                            "summary generation degraded, concatenating members"
                        );
                        truncate_chars(&texts.join("\n"), self.config.summary_max_chars)
                    }
                };

                summaries_done += 1;
                report(
                    self.progress.as_ref(),
                    Phase::Summarizing,
                    summaries_done.min(summary_estimate),
                    summary_estimate,
                );

                match self.provider.embed(&summary).await {
                    Ok(embedding) => {
                        vectors.push(
                            embedding.clone(),
                            EmbeddingRecord {
                                kind: SourceKind::Summary,
                                level,
                                chunk_ids: chunk_ids.clone(),
                            },
                        )?;
                        next.push(LevelNode {
                            text: summary,
                            embedding,
                            chunk_ids,
                        });
                    }
                    Err(e) => {
                        // Degraded branch: members stay reachable at their own level.
                        tracing::warn!(level, "summary embedding failed, dropping node: {e}");
                    }
                }
            }

            if next.is_empty() {
                break;
            }
            nodes = next;
        }

        Ok(level)
    }
}

/// Move a node out of the level without disturbing sibling indices.
fn take_node(nodes: &mut [LevelNode], index: usize) -> LevelNode {
    std::mem::replace(
        &mut nodes[index],
        LevelNode {
            text: String::new(),
            embedding: Vec::new(),
            chunk_ids: BTreeSet::new(),
        },
    )
}
