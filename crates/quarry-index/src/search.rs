//! Hybrid retrieval: concurrent semantic and keyword search fused by
//! reciprocal rank, then boosted, de-duplicated, and diversified.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use quarry_llm::LlmProvider;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::store::{IndexSlot, SearchIndex};
use crate::vector::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankSource {
    Semantic,
    Keyword,
    Both,
}

/// One retrieved leaf chunk with its fused relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Leaf position in the index generation.
    pub position: usize,
    pub file_path: String,
    pub file_name: String,
    pub text: String,
    pub score: f32,
    pub source: RankSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Nearest neighbors taken from the vector index.
    pub semantic_top: usize,
    /// Summary hits expanded into their descendant leaves.
    pub summary_top: usize,
    /// Candidates taken from the keyword index.
    pub keyword_top: usize,
    /// Reciprocal rank fusion constant.
    pub rrf_k: f32,
    /// Multiplier applied when a capitalized query term appears verbatim.
    pub proper_noun_boost: f32,
    /// Maximum results per source file.
    pub per_file_cap: usize,
    /// Result list length.
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_top: 15,
            summary_top: 3,
            keyword_top: 20,
            rrf_k: 60.0,
            proper_noun_boost: 1.5,
            per_file_cap: 2,
            top_k: 10,
        }
    }
}

/// Retrieval engine over the currently published index generation.
pub struct HybridEngine<P: LlmProvider> {
    slot: Arc<IndexSlot>,
    provider: Arc<P>,
    config: SearchConfig,
}

impl<P: LlmProvider + 'static> HybridEngine<P> {
    #[must_use]
    pub fn new(slot: Arc<IndexSlot>, provider: Arc<P>, config: SearchConfig) -> Self {
        Self {
            slot,
            provider,
            config,
        }
    }

    /// Run a hybrid query against the current generation.
    ///
    /// Semantic and keyword retrieval run concurrently; if one signal fails
    /// the other still produces results. Ordering is total: fused score
    /// descending, then leaf position ascending.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if no index has been published, or an error if
    /// both retrieval signals fail.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let index = self.slot.current().await.ok_or(IndexError::Unavailable)?;
        self.search_index(&index, query).await
    }

    /// Same as [`search`](Self::search) against an explicit generation.
    pub async fn search_index(
        &self,
        index: &Arc<SearchIndex>,
        query: &str,
    ) -> Result<Vec<SearchResult>> {
        let keyword_index = Arc::clone(index);
        let keyword_query = query.to_owned();
        let keyword_top = self.config.keyword_top;
        let keyword_task = tokio::task::spawn_blocking(move || {
            keyword_index.keyword().top_scores(&keyword_query, keyword_top)
        });

        let (semantic, keyword) = tokio::join!(self.semantic_ranks(index, query), keyword_task);

        let semantic = match semantic {
            Ok(ranks) => ranks,
            Err(e) => {
                tracing::warn!("semantic retrieval degraded: {e}");
                Vec::new()
            }
        };
        let keyword: Vec<usize> = match keyword {
            Ok(scored) => scored.into_iter().map(|(position, _)| position).collect(),
            Err(e) => {
                if semantic.is_empty() {
                    return Err(IndexError::Other(format!(
                        "both retrieval signals failed: {e}"
                    )));
                }
                tracing::warn!("keyword retrieval degraded: {e}");
                Vec::new()
            }
        };

        Ok(self.fuse(index, query, &semantic, &keyword))
    }

    /// Embed the query and rank leaf positions, expanding summary hits into
    /// their descendant leaves at the summary's rank.
    async fn semantic_ranks(&self, index: &SearchIndex, query: &str) -> Result<Vec<usize>> {
        let embedding = self.provider.embed(query).await?;
        let nearest = index
            .vectors()
            .nearest(&embedding, self.config.semantic_top)?;

        // Chunk ids are not positions once degraded leaves were dropped.
        let leaf_position: HashMap<crate::chunk::ChunkId, usize> = index
            .chunks()
            .iter()
            .enumerate()
            .map(|(position, c)| (c.id, position))
            .collect();

        let mut ranked: Vec<usize> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut summaries_used = 0;
        for (position, _distance) in nearest {
            let Some(record) = index.vectors().record(position) else {
                continue;
            };
            match record.kind {
                SourceKind::Leaf => {
                    if seen.insert(position) {
                        ranked.push(position);
                    }
                }
                SourceKind::Summary => {
                    if summaries_used >= self.config.summary_top {
                        continue;
                    }
                    summaries_used += 1;
                    for id in &record.chunk_ids {
                        if let Some(&leaf) = leaf_position.get(id)
                            && seen.insert(leaf)
                        {
                            ranked.push(leaf);
                        }
                    }
                }
            }
        }
        Ok(ranked)
    }

    /// Fuse the two rankings and apply boost, de-dup, cap, and truncation.
    fn fuse(
        &self,
        index: &SearchIndex,
        query: &str,
        semantic: &[usize],
        keyword: &[usize],
    ) -> Vec<SearchResult> {
        let mut fused: BTreeMap<usize, (f32, RankSource)> = BTreeMap::new();
        for (rank, &position) in semantic.iter().enumerate() {
            let contribution = 1.0 / (self.config.rrf_k + (rank + 1) as f32);
            fused.insert(position, (contribution, RankSource::Semantic));
        }
        for (rank, &position) in keyword.iter().enumerate() {
            let contribution = 1.0 / (self.config.rrf_k + (rank + 1) as f32);
            fused
                .entry(position)
                .and_modify(|(score, source)| {
                    *score += contribution;
                    *source = RankSource::Both;
                })
                .or_insert((contribution, RankSource::Keyword));
        }

        let proper_nouns = proper_nouns(query);
        let mut results: Vec<SearchResult> = fused
            .into_iter()
            .filter_map(|(position, (mut score, source))| {
                let chunk = index.chunk_at(position)?;
                if !proper_nouns.is_empty()
                    && proper_nouns.iter().any(|noun| chunk.text.contains(noun))
                {
                    score *= self.config.proper_noun_boost;
                }
                Some(SearchResult {
                    position,
                    file_path: chunk.file_path.clone(),
                    file_name: chunk.file_name.clone(),
                    text: chunk.text.clone(),
                    score,
                    source,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });

        // Near-duplicate collapse, then per-file diversification, in one pass
        // over the sorted list so the higher-scored occurrence always wins.
        let mut seen_prefixes: HashSet<[u8; 32]> = HashSet::new();
        let mut per_file: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::with_capacity(self.config.top_k);
        for result in results {
            if !seen_prefixes.insert(content_fingerprint(&result.text)) {
                continue;
            }
            let count = per_file.entry(result.file_path.clone()).or_insert(0);
            if *count >= self.config.per_file_cap.max(1) {
                continue;
            }
            *count += 1;
            out.push(result);
            if out.len() >= self.config.top_k {
                break;
            }
        }
        out
    }
}

/// Capitalized query terms of three or more letters.
fn proper_nouns(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| {
            word.chars().count() >= 3
                && word.chars().next().is_some_and(char::is_uppercase)
                && word.chars().skip(1).all(char::is_lowercase)
        })
        .map(str::to_owned)
        .collect()
}

/// Hash of the normalized leading 200 chars, for near-duplicate collapse.
fn content_fingerprint(text: &str) -> [u8; 32] {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(200)
        .collect();
    *blake3::hash(normalized.as_bytes()).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkId, FileId};
    use crate::vector::{EmbeddingRecord, VectorIndex};
    use quarry_llm::mock::{MockProvider, frequency_embedding};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn chunk(id: u64, file: u64, text: &str) -> Chunk {
        Chunk {
            id: ChunkId(id),
            file_id: FileId(file),
            file_path: format!("/docs/file{file}.txt"),
            file_name: format!("file{file}.txt"),
            text: text.to_owned(),
            char_range: (0, text.chars().count()),
        }
    }

    fn leaf_index(chunks: Vec<Chunk>) -> Arc<SearchIndex> {
        let mut vectors = VectorIndex::new();
        for c in &chunks {
            vectors
                .push(
                    frequency_embedding(&c.text),
                    EmbeddingRecord {
                        kind: SourceKind::Leaf,
                        level: 0,
                        chunk_ids: BTreeSet::from([c.id]),
                    },
                )
                .unwrap();
        }
        Arc::new(SearchIndex::assemble(
            vectors,
            chunks,
            vec![PathBuf::from("/docs")],
            0,
        ))
    }

    async fn published_engine(
        chunks: Vec<Chunk>,
        provider: MockProvider,
        config: SearchConfig,
    ) -> HybridEngine<MockProvider> {
        let slot = Arc::new(IndexSlot::new());
        slot.publish(leaf_index(chunks)).await;
        HybridEngine::new(slot, Arc::new(provider), config)
    }

    #[tokio::test]
    async fn unpublished_slot_is_unavailable() {
        let engine = HybridEngine::new(
            Arc::new(IndexSlot::new()),
            Arc::new(MockProvider::with_content_embeddings()),
            SearchConfig::default(),
        );
        assert!(matches!(
            engine.search("anything").await,
            Err(IndexError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn finds_relevant_chunks() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "Cats purr and chase mice around the house."),
                chunk(1, 1, "Quarterly revenue figures exceeded the budget."),
            ],
            MockProvider::with_content_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let results = engine.search("revenue budget figures").await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].position, 1);
    }

    #[tokio::test]
    async fn both_signals_mark_source_both() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "Cats purr and chase mice around the house."),
                chunk(1, 1, "Quarterly revenue figures exceeded the budget."),
            ],
            MockProvider::with_content_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let results = engine.search("revenue budget figures").await.unwrap();
        assert_eq!(results[0].source, RankSource::Both);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_keyword_only() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "Cats purr and chase mice."),
                chunk(1, 1, "Quarterly revenue exceeded the budget."),
            ],
            MockProvider::failing_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let results = engine.search("revenue budget").await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source == RankSource::Keyword));
    }

    #[tokio::test]
    async fn per_file_cap_diversifies() {
        let config = SearchConfig {
            per_file_cap: 2,
            ..SearchConfig::default()
        };
        let engine = published_engine(
            vec![
                chunk(0, 0, "Revenue grew in the first quarter."),
                chunk(1, 0, "Revenue grew in the second quarter."),
                chunk(2, 0, "Revenue grew in the third quarter."),
                chunk(3, 1, "Cats ignored the revenue entirely."),
            ],
            MockProvider::with_content_embeddings(),
            config,
        )
        .await;

        let results = engine.search("revenue quarter growth").await.unwrap();
        let from_file0 = results
            .iter()
            .filter(|r| r.file_name == "file0.txt")
            .count();
        assert!(from_file0 <= 2);
        assert!(results.iter().any(|r| r.file_name == "file1.txt"));
    }

    #[tokio::test]
    async fn near_duplicates_collapse() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "The launch date is March twelve."),
                chunk(1, 1, "  THE   launch DATE is march twelve. "),
                chunk(2, 2, "Cats purr quietly at night."),
            ],
            MockProvider::with_content_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let results = engine.search("launch date march").await.unwrap();
        let launch_hits = results
            .iter()
            .filter(|r| r.text.to_lowercase().contains("launch"))
            .count();
        assert_eq!(launch_hits, 1);
    }

    #[tokio::test]
    async fn proper_noun_match_outranks() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "The committee discussed general budget policy."),
                chunk(1, 1, "Thompson presented the committee budget policy."),
            ],
            MockProvider::with_content_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let results = engine
            .search("What did Thompson say about budget policy?")
            .await
            .unwrap();
        assert_eq!(results[0].position, 1);
    }

    #[tokio::test]
    async fn ordering_is_stable_and_total() {
        let engine = published_engine(
            vec![
                chunk(0, 0, "Alpha topic one entirely."),
                chunk(1, 1, "Alpha subject two entirely."),
                chunk(2, 2, "Unrelated feline content here."),
            ],
            MockProvider::with_content_embeddings(),
            SearchConfig::default(),
        )
        .await;

        let a = engine.search("alpha entirely").await.unwrap();
        let b = engine.search("alpha entirely").await.unwrap();
        let positions_a: Vec<usize> = a.iter().map(|r| r.position).collect();
        let positions_b: Vec<usize> = b.iter().map(|r| r.position).collect();
        assert_eq!(positions_a, positions_b);
        for pair in a.windows(2) {
            assert!(
                pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].position < pair[1].position)
            );
        }
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let config = SearchConfig {
            top_k: 2,
            per_file_cap: 5,
            ..SearchConfig::default()
        };
        let chunks = (0..6)
            .map(|i| chunk(i, i, &format!("Revenue report number {i} for review.")))
            .collect();
        let engine = published_engine(chunks, MockProvider::with_content_embeddings(), config).await;
        let results = engine.search("revenue report review").await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn proper_noun_extraction() {
        assert_eq!(proper_nouns("what did Thompson tell Maria"), vec![
            "Thompson".to_owned(),
            "Maria".to_owned()
        ]);
        assert!(proper_nouns("no capitals here").is_empty());
        // All-caps acronyms and short words are not proper nouns.
        assert!(proper_nouns("the API is up").is_empty());
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        assert_eq!(
            content_fingerprint("Hello   World"),
            content_fingerprint("hello world")
        );
        assert_ne!(
            content_fingerprint("hello world"),
            content_fingerprint("goodbye world")
        );
    }
}
