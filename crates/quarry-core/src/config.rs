//! TOML configuration for the engine and agent.

use std::path::{Path, PathBuf};

use quarry_index::search::SearchConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub agent: AgentConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a TOML file. Missing sections fall back to
    /// defaults; a missing file is an error, not a silent default.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_owned()
}

fn default_model() -> String {
    "llama3.1:8b".to_owned()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_owned()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint base URL.
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Environment variable holding the API key, if the endpoint needs one.
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Serialize generations for single-model local backends.
    pub exclusive: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            api_key_env: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            exclusive: true,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_levels() -> u32 {
    4
}

fn default_min_similarity() -> f32 {
    0.55
}

fn default_max_cluster_size() -> usize {
    32
}

fn default_summary_max_chars() -> usize {
    1200
}

fn default_embed_concurrency() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directories whose documents are indexed.
    pub roots: Vec<PathBuf>,
    /// Snapshot location; `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_levels: u32,
    pub min_similarity: f32,
    pub max_cluster_size: usize,
    pub summary_max_chars: usize,
    pub embed_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            snapshot_path: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_levels: default_max_levels(),
            min_similarity: default_min_similarity(),
            max_cluster_size: default_max_cluster_size(),
            summary_max_chars: default_summary_max_chars(),
            embed_concurrency: default_embed_concurrency(),
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn splitter(&self) -> quarry_index::chunk::SplitterConfig {
        quarry_index::chunk::SplitterConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    #[must_use]
    pub fn raptor(&self) -> quarry_index::raptor::RaptorConfig {
        quarry_index::raptor::RaptorConfig {
            max_levels: self.max_levels,
            cluster: quarry_index::raptor::ClusterParams {
                min_similarity: self.min_similarity,
                max_cluster_size: self.max_cluster_size,
            },
            summary_max_chars: self.summary_max_chars,
            embed_concurrency: self.embed_concurrency,
            ..quarry_index::raptor::RaptorConfig::default()
        }
    }
}

fn default_max_steps() -> u32 {
    8
}

fn default_max_format_retries() -> u32 {
    2
}

fn default_search_window() -> usize {
    350
}

fn default_read_window() -> usize {
    800
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard bound on reasoning steps per run.
    pub max_steps: u32,
    /// Re-prompts allowed for one unparseable model reply.
    pub max_format_retries: u32,
    /// Observation window for search results, in chars.
    pub search_window: usize,
    /// Observation window for file reads, in chars.
    pub read_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_format_retries: default_max_format_retries(),
            search_window: default_search_window(),
            read_window: default_read_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache snapshot location; `None` keeps the cache memory-only.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.index.chunk_size, 1000);
        assert_eq!(config.index.chunk_overlap, 200);
        assert_eq!(config.agent.max_steps, 8);
        assert!(config.cache.enabled);
        assert!((config.search.rrf_k - 60.0).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "qwen2.5:14b"

            [index]
            roots = ["/data/docs"]
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "qwen2.5:14b");
        assert_eq!(config.llm.embedding_model, "nomic-embed-text");
        assert_eq!(config.index.roots, vec![PathBuf::from("/data/docs")]);
        assert_eq!(config.agent.max_format_retries, 2);
    }

    #[tokio::test]
    async fn load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/quarry.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");
        tokio::fs::write(&path, "[agent]\nmax_steps = 3\n")
            .await
            .unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.agent.max_steps, 3);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let result: std::result::Result<Config, _> = toml::from_str("agent = 12");
        assert!(result.is_err());
    }
}
