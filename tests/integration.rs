//! End-to-end pipeline tests: load documents, build the index, publish it,
//! search it, and drive the agent over it with a scripted model.

use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::agent::tools::Toolbox;
use quarry_core::agent::Agent;
use quarry_core::cache::{CacheKey, ResponseCache};
use quarry_core::config::AgentConfig;
use quarry_core::{RunState, StepKind};
use quarry_index::chunk::SplitterConfig;
use quarry_index::loader::load_chunks;
use quarry_index::raptor::{ExtractiveSummarizer, RaptorBuilder, RaptorConfig};
use quarry_index::search::{HybridEngine, SearchConfig};
use quarry_index::{IndexSlot, SearchIndex};
use quarry_llm::mock::MockProvider;

async fn write_corpus(dir: &std::path::Path) {
    tokio::fs::write(
        dir.join("launch.txt"),
        "The product launch is scheduled for March. Marketing starts in February. \
         The launch venue is the main conference hall.",
    )
    .await
    .unwrap();
    tokio::fs::write(
        dir.join("finance.md"),
        "Quarterly revenue exceeded every forecast. The budget for next year grows \
         by ten percent. Revenue growth was strongest in the final quarter.",
    )
    .await
    .unwrap();
}

async fn build_published_index(roots: Vec<PathBuf>) -> Arc<IndexSlot> {
    let chunks = load_chunks(&roots, &SplitterConfig::default()).await.unwrap();
    assert!(!chunks.is_empty());

    let builder = RaptorBuilder::new(
        Arc::new(MockProvider::with_content_embeddings()),
        ExtractiveSummarizer::default(),
        RaptorConfig::default(),
    );
    let index = builder.build(chunks, roots).await.unwrap();

    let slot = Arc::new(IndexSlot::new());
    slot.publish(Arc::new(index)).await;
    slot
}

#[tokio::test]
async fn index_search_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path()).await;
    let slot = build_published_index(vec![dir.path().to_path_buf()]).await;

    let engine = HybridEngine::new(
        slot,
        Arc::new(MockProvider::with_content_embeddings()),
        SearchConfig::default(),
    );
    let results = engine.search("quarterly revenue forecast").await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].file_name, "finance.md");
}

#[tokio::test]
async fn diversification_keeps_both_files_reachable() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path()).await;
    let slot = build_published_index(vec![dir.path().to_path_buf()]).await;

    let engine = HybridEngine::new(
        slot,
        Arc::new(MockProvider::with_content_embeddings()),
        SearchConfig::default(),
    );
    // Terms from both documents.
    let results = engine.search("launch revenue quarter march").await.unwrap();
    let files: std::collections::HashSet<&str> =
        results.iter().map(|r| r.file_name.as_str()).collect();
    assert!(files.len() >= 2, "expected hits from both files: {files:?}");
    for file in &files {
        let count = results.iter().filter(|r| r.file_name == *file).count();
        assert!(count <= 2, "per-file cap violated for {file}");
    }
}

#[tokio::test]
async fn snapshot_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path()).await;
    let chunks = load_chunks(&[dir.path().to_path_buf()], &SplitterConfig::default())
        .await
        .unwrap();
    let builder = RaptorBuilder::new(
        Arc::new(MockProvider::with_content_embeddings()),
        ExtractiveSummarizer::default(),
        RaptorConfig::default(),
    );
    let index = builder
        .build(chunks, vec![dir.path().to_path_buf()])
        .await
        .unwrap();

    let snapshot = dir.path().join("index.json");
    index.save(&snapshot).await.unwrap();
    let reloaded = SearchIndex::load(&snapshot).await.unwrap();
    assert_eq!(reloaded.chunk_count(), index.chunk_count());
    assert_eq!(reloaded.vector_count(), index.vector_count());

    let slot = Arc::new(IndexSlot::new());
    slot.publish(Arc::new(reloaded)).await;
    let engine = HybridEngine::new(
        slot,
        Arc::new(MockProvider::with_content_embeddings()),
        SearchConfig::default(),
    );
    assert!(!engine.search("launch march").await.unwrap().is_empty());
}

#[tokio::test]
async fn agent_answers_through_tools() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path()).await;
    let slot = build_published_index(vec![dir.path().to_path_buf()]).await;

    let engine = HybridEngine::new(
        Arc::clone(&slot),
        Arc::new(MockProvider::with_content_embeddings()),
        SearchConfig::default(),
    );
    let toolbox = Toolbox::new(engine, slot, 350, 800);
    let scripted = MockProvider::with_responses(vec![
        "Thought: I should search for the launch.\nAction: search_knowledge_base(\"launch date\")"
            .to_owned(),
        "Answer: The launch is in March.".to_owned(),
    ]);
    let agent = Agent::new(Arc::new(scripted), toolbox, AgentConfig::default());

    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let run = agent.run("When is the launch?", Some(tx)).await;

    assert_eq!(run.state, RunState::Answered);
    assert_eq!(run.answer.as_deref(), Some("The launch is in March."));
    let observation = run
        .steps
        .iter()
        .find(|s| s.kind == StepKind::Observation)
        .unwrap();
    assert!(observation.content.contains("launch.txt"));

    let mut streamed = 0;
    while rx.try_recv().is_ok() {
        streamed += 1;
    }
    assert_eq!(streamed, run.steps.len());
}

#[tokio::test]
async fn agent_self_corrects_after_malformed_turn() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path()).await;
    let slot = build_published_index(vec![dir.path().to_path_buf()]).await;

    let engine = HybridEngine::new(
        Arc::clone(&slot),
        Arc::new(MockProvider::with_content_embeddings()),
        SearchConfig::default(),
    );
    let toolbox = Toolbox::new(engine, slot, 350, 800);
    let scripted = MockProvider::with_responses(vec![
        "I'd be happy to help with that!".to_owned(),
        "Answer: Recovered after correction.".to_owned(),
    ]);
    let agent = Agent::new(Arc::new(scripted), toolbox, AgentConfig::default());

    let run = agent.run("q", None).await;
    assert_eq!(run.state, RunState::Answered);
    let corrective = run
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::Observation && s.content.contains("required format"))
        .count();
    assert_eq!(corrective, 1);
    assert!(run.steps.iter().all(|s| s.kind != StepKind::Error));
}

#[tokio::test]
async fn cached_answer_is_reused_until_cleared() {
    let cache = ResponseCache::new();
    let snippets = vec!["The launch is in March.".to_owned()];
    let key = CacheKey::derive("When is the launch?", &snippets);

    let (first, hit) = cache
        .get_or_compute(key, || async { Ok("March.".to_owned()) })
        .await
        .unwrap();
    assert!(!hit);

    let (second, hit) = cache
        .get_or_compute(key, || async { Ok("should not run".to_owned()) })
        .await
        .unwrap();
    assert!(hit);
    assert_eq!(first, second);

    cache.clear().await;
    let stats = cache.stats().await;
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_hits, 0);

    let (_, hit) = cache
        .get_or_compute(key, || async { Ok("recomputed".to_owned()) })
        .await
        .unwrap();
    assert!(!hit);
}
