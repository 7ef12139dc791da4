//! Agent orchestration, response cache, and configuration for Quarry.
//!
//! The engine's stateful pieces live here: the content-addressed response
//! cache, the bounded ReAct loop that chains tool calls over the index, and
//! the TOML configuration the binary loads at startup.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;

pub use agent::Agent;
pub use agent::step::{AgentRun, AgentStep, RunState, StepKind};
pub use agent::tools::{Tool, Toolbox};
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use config::Config;
pub use error::{AgentError, ConfigError, Result, ToolError};
