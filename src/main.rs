use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_core::agent::tools::Toolbox;
use quarry_core::agent::Agent;
use quarry_core::cache::{CacheKey, ResponseCache};
use quarry_core::config::Config;
use quarry_core::{AgentStep, RunState, StepKind};
use quarry_index::loader::load_chunks;
use quarry_index::progress::{ProgressEvent, ProgressSink};
use quarry_index::raptor::{ExtractiveSummarizer, LlmSummarizer, RaptorBuilder};
use quarry_index::search::HybridEngine;
use quarry_index::{IndexSlot, SearchIndex};
use quarry_llm::exclusive::ExclusiveProvider;
use quarry_llm::openai::OpenAiProvider;
use quarry_llm::provider::Message;
use quarry_llm::LlmProvider;

const DEFAULT_SNAPSHOT: &str = ".quarry/index.json";
const DEFAULT_CACHE: &str = ".quarry/cache.json";

#[derive(Parser)]
#[command(name = "quarry", version, about = "Local semantic search over your documents")]
struct Cli {
    /// Path to quarry.toml; defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index over one or more document directories.
    Index {
        /// Directories to index; overrides `index.roots` from the config.
        paths: Vec<PathBuf>,
        /// Use the deterministic extractive summarizer instead of the LLM.
        #[arg(long)]
        extractive: bool,
    },
    /// Run one hybrid query against the index.
    Search {
        query: String,
        #[arg(long)]
        top: Option<usize>,
    },
    /// Answer a question with retrieved context, through the response cache.
    Ask { question: String },
    /// Answer a multi-step question with the reasoning agent.
    Agent { question: String },
    /// Show response cache statistics.
    CacheStats,
    /// Drop every cached response.
    CacheClear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    let api_key = config
        .llm
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .unwrap_or_default();
    let provider = OpenAiProvider::new(
        config.llm.base_url.clone(),
        api_key,
        config.llm.model.clone(),
        Some(config.llm.embedding_model.clone()),
        config.llm.max_tokens,
    )
    .with_timeout(config.llm.timeout_secs);

    if config.llm.exclusive {
        run(cli.command, config, Arc::new(ExclusiveProvider::new(provider))).await
    } else {
        run(cli.command, config, Arc::new(provider)).await
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return Ok(Config::load(path).await?);
    }
    let default = Path::new("quarry.toml");
    if default.exists() {
        return Ok(Config::load(default).await?);
    }
    Ok(Config::default())
}

async fn run<P: LlmProvider + 'static>(
    command: Command,
    config: Config,
    provider: Arc<P>,
) -> anyhow::Result<()> {
    match command {
        Command::Index { paths, extractive } => index(&config, provider, paths, extractive).await,
        Command::Search { query, top } => search(&config, provider, &query, top).await,
        Command::Ask { question } => ask(&config, provider, &question).await,
        Command::Agent { question } => agent(&config, provider, &question).await,
        Command::CacheStats => {
            let cache = ResponseCache::load(&cache_path(&config)).await?;
            let stats = cache.stats().await;
            println!("entries: {}", stats.total_entries);
            println!("hits:    {}", stats.total_hits);
            Ok(())
        }
        Command::CacheClear => {
            let path = cache_path(&config);
            let cache = ResponseCache::load(&path).await?;
            cache.clear().await;
            cache.save(&path).await?;
            println!("cache cleared");
            Ok(())
        }
    }
}

fn snapshot_path(config: &Config) -> PathBuf {
    config
        .index
        .snapshot_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT))
}

fn cache_path(config: &Config) -> PathBuf {
    config
        .cache
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE))
}

fn progress_printer() -> ProgressSink {
    Arc::new(|event: ProgressEvent| {
        eprintln!(
            "[{:>3.0}%] {} ({}/{})",
            f64::from(event.fraction()) * 100.0,
            event.phase.label(),
            event.processed,
            event.total
        );
    })
}

async fn index<P: LlmProvider + 'static>(
    config: &Config,
    provider: Arc<P>,
    paths: Vec<PathBuf>,
    extractive: bool,
) -> anyhow::Result<()> {
    let roots = if paths.is_empty() {
        config.index.roots.clone()
    } else {
        paths
    };
    anyhow::ensure!(
        !roots.is_empty(),
        "no directories to index; pass paths or set index.roots"
    );

    let chunks = load_chunks(&roots, &config.index.splitter()).await?;
    anyhow::ensure!(!chunks.is_empty(), "no indexable documents found");
    println!("loaded {} chunks", chunks.len());

    let raptor = config.index.raptor();
    let built = if extractive {
        RaptorBuilder::new(provider, ExtractiveSummarizer::default(), raptor)
            .with_progress(progress_printer())
            .build(chunks, roots)
            .await?
    } else {
        let summarizer = LlmSummarizer::new(Arc::clone(&provider));
        RaptorBuilder::new(provider, summarizer, raptor)
            .with_progress(progress_printer())
            .build(chunks, roots)
            .await?
    };

    let path = snapshot_path(config);
    built.save(&path).await?;
    println!(
        "indexed {} chunks into {} nodes across {} summary levels -> {}",
        built.chunk_count(),
        built.vector_count(),
        built.levels(),
        path.display()
    );
    Ok(())
}

async fn load_slot(config: &Config) -> anyhow::Result<Arc<IndexSlot>> {
    let path = snapshot_path(config);
    let index = SearchIndex::load(&path)
        .await
        .with_context(|| format!("no index at {} (run `quarry index` first)", path.display()))?;
    tracing::info!(
        chunks = index.chunk_count(),
        levels = index.levels(),
        "loaded index snapshot from {}",
        path.display()
    );
    let slot = Arc::new(IndexSlot::new());
    slot.publish(Arc::new(index)).await;
    Ok(slot)
}

async fn search<P: LlmProvider + 'static>(
    config: &Config,
    provider: Arc<P>,
    query: &str,
    top: Option<usize>,
) -> anyhow::Result<()> {
    let slot = load_slot(config).await?;
    let mut search_config = config.search.clone();
    if let Some(top) = top {
        search_config.top_k = top;
    }
    let engine = HybridEngine::new(slot, provider, search_config);
    let results = engine.search(query).await?;

    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. [{:.4}] {} ({:?})",
            rank + 1,
            result.score,
            result.file_name,
            result.source
        );
        let preview: String = result.text.chars().take(200).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

async fn ask<P: LlmProvider + 'static>(
    config: &Config,
    provider: Arc<P>,
    question: &str,
) -> anyhow::Result<()> {
    let slot = load_slot(config).await?;
    let engine = HybridEngine::new(slot, Arc::clone(&provider), config.search.clone());
    let results = engine.search(question).await?;
    let snippets: Vec<String> = results.iter().map(|r| r.text.clone()).collect();

    let cache_file = cache_path(config);
    let cache = if config.cache.enabled {
        ResponseCache::load(&cache_file).await?
    } else {
        ResponseCache::new()
    };

    let key = CacheKey::derive(question, &snippets);
    let prompt_provider = Arc::clone(&provider);
    let context_block = snippets.join("\n---\n");
    let question_owned = question.to_owned();
    let (answer, hit) = cache
        .get_or_compute(key, move || async move {
            let prompt = format!(
                "Answer the question using only the context below. If the context is \
                 insufficient, say so.\n\nContext:\n{context_block}\n\nQuestion: {question_owned}"
            );
            Ok(prompt_provider.chat(&[Message::user(prompt)]).await?)
        })
        .await?;

    if hit {
        println!("(cached)");
    }
    println!("{answer}");
    if config.cache.enabled {
        cache.save(&cache_file).await?;
    }
    Ok(())
}

async fn agent<P: LlmProvider + 'static>(
    config: &Config,
    provider: Arc<P>,
    question: &str,
) -> anyhow::Result<()> {
    let slot = load_slot(config).await?;
    let engine = HybridEngine::new(Arc::clone(&slot), Arc::clone(&provider), config.search.clone());
    let toolbox = Toolbox::new(
        engine,
        slot,
        config.agent.search_window,
        config.agent.read_window,
    );
    let agent = Agent::new(provider, toolbox, config.agent.clone());

    let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentStep>(64);
    let printer = tokio::spawn(async move {
        while let Some(step) = rx.recv().await {
            let label = match step.kind {
                StepKind::Thought => "thought",
                StepKind::Action => "action",
                StepKind::Observation => "observation",
                StepKind::Answer => "answer",
                StepKind::Error => "error",
            };
            println!("[{label}] {}", step.content);
        }
    });

    let run = agent.run(question, Some(tx)).await;
    printer.await.ok();

    match run.state {
        RunState::Answered => Ok(()),
        RunState::Errored => anyhow::bail!("agent run failed"),
        RunState::MaxStepsExceeded => anyhow::bail!("agent exceeded its step budget"),
    }
}
