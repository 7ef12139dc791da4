//! Flat exact vector index with positionally-aligned metadata records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;
use crate::error::{IndexError, Result};

/// Whether a vector position holds a raw chunk or a generated summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Leaf,
    Summary,
}

/// Metadata for one vector position. Vectors and records are parallel arrays;
/// insertion order defines position and is never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub kind: SourceKind,
    /// 0 for leaves, >0 for summary levels.
    pub level: u32,
    /// All descendant leaf chunk ids (a single id for leaves).
    pub chunk_ids: BTreeSet<ChunkId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    records: Vec<EmbeddingRecord>,
}

impl VectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a vector with its record, returning the assigned position.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the vector's length differs from the
    /// first inserted vector.
    pub fn push(&mut self, vector: Vec<f32>, record: EmbeddingRecord) -> Result<usize> {
        if self.vectors.is_empty() {
            self.dim = vector.len();
        } else if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let position = self.vectors.len();
        self.vectors.push(vector);
        self.records.push(record);
        Ok(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn record(&self, position: usize) -> Option<&EmbeddingRecord> {
        self.records.get(position)
    }

    #[must_use]
    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    /// Exact top-`k` nearest neighbors by squared Euclidean distance.
    ///
    /// Full scan by design: retrieval accuracy is preferred over build speed.
    /// Ties break on the lower position for reproducibility.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query length differs from indexed vectors.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
