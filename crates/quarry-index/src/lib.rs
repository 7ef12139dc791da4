//! Hierarchical summarization index and hybrid retrieval.
//!
//! Documents are split into chunks, embedded, and organized into a multi-level
//! cluster tree: each level groups similar nodes and condenses every group into
//! a summary node, so retrieval can match both raw passages and broader themes.
//! Queries run semantic and keyword retrieval concurrently and fuse the two
//! rankings into one diversified result list.

pub mod chunk;
pub(crate) mod cluster;
pub mod error;
pub mod keyword;
pub mod loader;
pub mod progress;
pub mod raptor;
pub mod search;
pub mod store;
pub mod vector;

pub use error::{IndexError, Result};
pub use store::{FileRegistry, IndexSlot, RegistryError, SearchIndex};
