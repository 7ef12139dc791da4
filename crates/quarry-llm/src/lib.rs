//! LLM provider abstraction and backend implementations.

pub mod error;
pub mod exclusive;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod openai;
pub mod provider;
mod retry;

pub use error::LlmError;
pub use exclusive::ExclusiveProvider;
pub use provider::LlmProvider;
