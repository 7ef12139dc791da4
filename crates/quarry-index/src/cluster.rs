//! Similarity grouping for one tree level.
//!
//! Greedy centroid assignment: each node joins the best existing cluster whose
//! centroid similarity clears the threshold and which still has room, otherwise
//! it opens a new cluster. Deterministic for a given node order, cluster count
//! falls out of the threshold rather than being fixed a priori.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Minimum cosine similarity to the cluster centroid to join it.
    pub min_similarity: f32,
    /// Hard cap on members per cluster.
    pub max_cluster_size: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            min_similarity: 0.55,
            max_cluster_size: 32,
        }
    }
}

struct ClusterAccum {
    members: Vec<usize>,
    /// Unnormalized running sum of member vectors.
    sum: Vec<f32>,
}

impl ClusterAccum {
    fn centroid_similarity(&self, vector: &[f32]) -> f32 {
        let inv = 1.0 / self.members.len() as f32;
        let dot: f32 = self.sum.iter().zip(vector).map(|(s, v)| s * inv * v).sum();
        let norm_c: f32 = self
            .sum
            .iter()
            .map(|s| (s * inv) * (s * inv))
            .sum::<f32>()
            .sqrt();
        let norm_v: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_c == 0.0 || norm_v == 0.0 {
            return 0.0;
        }
        dot / (norm_c * norm_v)
    }

    fn add(&mut self, index: usize, vector: &[f32]) {
        for (s, v) in self.sum.iter_mut().zip(vector) {
            *s += v;
        }
        self.members.push(index);
    }
}

/// Group level nodes into clusters of similar embeddings.
///
/// Returns member-index lists in the order clusters were opened; every input
/// index appears in exactly one cluster. A node with no acceptable neighbor
/// becomes a singleton.
pub(crate) fn cluster_level(embeddings: &[Vec<f32>], params: ClusterParams) -> Vec<Vec<usize>> {
    let max_size = params.max_cluster_size.max(1);
    let mut clusters: Vec<ClusterAccum> = Vec::new();

    for (i, vector) in embeddings.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (c, cluster) in clusters.iter().enumerate() {
            if cluster.members.len() >= max_size {
                continue;
            }
            let sim = cluster.centroid_similarity(vector);
            if sim >= params.min_similarity && best.is_none_or(|(_, s)| sim > s) {
                best = Some((c, sim));
            }
        }

        match best {
            Some((c, _)) => clusters[c].add(i, vector),
            None => clusters.push(ClusterAccum {
                members: vec![i],
                sum: vector.clone(),
            }),
        }
    }

    clusters.into_iter().map(|c| c.members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_similarity: f32, max_cluster_size: usize) -> ClusterParams {
        ClusterParams {
            min_similarity,
            max_cluster_size,
        }
    }

    #[test]
    fn identical_vectors_share_a_cluster() {
        let embeddings = vec![vec![1.0, 0.0]; 4];
        let clusters = cluster_level(&embeddings, params(0.5, 10));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![0, 1, 2, 3]);
    }

    #[test]
    fn orthogonal_vectors_split() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.1],
            vec![0.1, 1.0],
        ];
        let clusters = cluster_level(&embeddings, params(0.8, 10));
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].contains(&0) && clusters[0].contains(&2));
        assert!(clusters[1].contains(&1) && clusters[1].contains(&3));
    }

    #[test]
    fn every_index_appears_exactly_once() {
        let embeddings: Vec<Vec<f32>> = (0..20)
            .map(|i| vec![(i % 3) as f32, (i % 5) as f32, 1.0])
            .collect();
        let clusters = cluster_level(&embeddings, params(0.9, 4));

        let mut seen: Vec<usize> = clusters.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn max_size_opens_overflow_cluster() {
        let embeddings = vec![vec![1.0, 0.0]; 5];
        let clusters = cluster_level(&embeddings, params(0.5, 2));
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.len() <= 2));
    }

    #[test]
    fn dissimilar_node_is_singleton() {
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.05], vec![-1.0, 0.0]];
        let clusters = cluster_level(&embeddings, params(0.7, 10));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1], vec![2]);
    }

    #[test]
    fn deterministic_for_same_input() {
        let embeddings: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos()])
            .collect();
        let a = cluster_level(&embeddings, params(0.6, 5));
        let b = cluster_level(&embeddings, params(0.6, 5));
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        assert!(cluster_level(&[], ClusterParams::default()).is_empty());
    }
}
