//! The agent's closed tool set.
//!
//! Dispatch is an exhaustive match over a fixed enum; the model can never
//! invoke anything that is not listed here.

use std::sync::Arc;

use quarry_index::search::HybridEngine;
use quarry_index::{FileRegistry, IndexError, IndexSlot};
use quarry_llm::LlmProvider;

use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Search,
    ListFiles,
    ReadFile,
}

impl Tool {
    /// Map a model-supplied tool name onto the closed set.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "search_knowledge_base" => Some(Self::Search),
            "list_files" => Some(Self::ListFiles),
            "read_file" => Some(Self::ReadFile),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Search => "search_knowledge_base",
            Self::ListFiles => "list_files",
            Self::ReadFile => "read_file",
        }
    }

    /// Tool catalogue text injected into the system prompt.
    #[must_use]
    pub fn catalogue() -> &'static str {
        "search_knowledge_base(\"query\") - search the indexed documents for relevant passages\n\
         list_files(\"\") - list the files in the index\n\
         read_file(\"filename\") - read the full text of one indexed file"
    }
}

/// Executes tool calls against the published index generation.
pub struct Toolbox<P: LlmProvider> {
    engine: HybridEngine<P>,
    slot: Arc<IndexSlot>,
    search_window: usize,
    read_window: usize,
}

impl<P: LlmProvider + 'static> Toolbox<P> {
    #[must_use]
    pub fn new(
        engine: HybridEngine<P>,
        slot: Arc<IndexSlot>,
        search_window: usize,
        read_window: usize,
    ) -> Self {
        Self {
            engine,
            slot,
            search_window,
            read_window,
        }
    }

    /// Run one tool call and render its result as an observation string.
    ///
    /// # Errors
    ///
    /// Returns a `ToolError` the loop feeds back to the model; only the
    /// caller decides whether it is fatal.
    pub async fn dispatch(&self, tool: Tool, input: &str) -> std::result::Result<String, ToolError> {
        match tool {
            Tool::Search => self.search(input).await,
            Tool::ListFiles => self.list_files().await,
            Tool::ReadFile => self.read_file(input).await,
        }
    }

    async fn search(&self, query: &str) -> std::result::Result<String, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::EmptyInput {
                tool: Tool::Search.name(),
            });
        }
        let results = self.engine.search(query).await?;
        if results.is_empty() {
            return Ok("No relevant passages found.".to_owned());
        }

        let mut out = String::new();
        for result in results.iter().take(3) {
            let snippet: String = result.text.chars().take(self.search_window).collect();
            out.push_str(&format!("Source: {}\nContent: {snippet}\n\n", result.file_name));
        }
        Ok(out.trim_end().to_owned())
    }

    async fn list_files(&self) -> std::result::Result<String, ToolError> {
        let index = self.slot.current().await.ok_or(IndexError::Unavailable)?;
        let registry = FileRegistry::new(index);
        let files = registry.list();
        if files.is_empty() {
            return Ok("The index contains no files.".to_owned());
        }
        let listing: Vec<String> = files
            .iter()
            .map(|f| format!("{} ({} chunks)", f.name, f.chunk_count))
            .collect();
        Ok(listing.join("\n"))
    }

    async fn read_file(&self, name_or_path: &str) -> std::result::Result<String, ToolError> {
        if name_or_path.trim().is_empty() {
            return Err(ToolError::EmptyInput {
                tool: Tool::ReadFile.name(),
            });
        }
        let index = self.slot.current().await.ok_or(IndexError::Unavailable)?;
        let registry = FileRegistry::new(index);
        // Model-supplied strings are never treated as paths directly; the
        // registry confines resolution to the indexed roots.
        let file = registry.resolve(name_or_path)?.clone();
        let text = registry.file_text(&file);
        let total = text.chars().count();
        let windowed: String = text.chars().take(self.read_window).collect();
        let shown = windowed.chars().count();
        if shown < total {
            Ok(format!("{windowed}\n[truncated: {shown} of {total} chars]"))
        } else {
            Ok(windowed)
        }
    }
}
