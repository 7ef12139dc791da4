//! Error types for quarry-core.

/// Errors raised by agent tool execution. Recoverable ones feed back to the
/// model as error observations; a fatal one terminates the run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The model named a tool outside the closed tool set.
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    /// File lookup refused or failed at the registry boundary.
    #[error(transparent)]
    Registry(#[from] quarry_index::RegistryError),

    /// Retrieval failure inside the search tool.
    #[error(transparent)]
    Index(#[from] quarry_index::IndexError),

    /// The tool requires a non-empty argument.
    #[error("{tool} requires a non-empty input")]
    EmptyInput { tool: &'static str },
}

impl ToolError {
    /// Whether no later turn can recover from this failure. An unpublished
    /// index stays unpublished for the lifetime of the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Index(quarry_index::IndexError::Unavailable))
    }
}

/// Errors that terminate an agent run or fail a cached computation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    #[error("index error: {0}")]
    Index(#[from] quarry_index::IndexError),

    #[error("{0}")]
    Other(String),
}

/// Errors loading or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_an_unpublished_index_is_fatal() {
        assert!(ToolError::from(quarry_index::IndexError::Unavailable).is_fatal());
        assert!(!ToolError::UnknownTool("rm_rf".into()).is_fatal());
        assert!(!ToolError::EmptyInput { tool: "read_file" }.is_fatal());
    }
}
