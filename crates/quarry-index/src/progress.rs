//! Observable build progress as weighted phases.

use std::sync::Arc;

/// Index build phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Embedding,
    Clustering,
    Summarizing,
    Finalizing,
}

impl Phase {
    /// Fraction of total build time this phase starts at.
    #[must_use]
    pub fn base(self) -> f32 {
        match self {
            Self::Embedding => 0.0,
            Self::Clustering => 0.55,
            Self::Summarizing => 0.65,
            Self::Finalizing => 0.95,
        }
    }

    #[must_use]
    pub fn weight(self) -> f32 {
        match self {
            Self::Embedding => 0.55,
            Self::Clustering => 0.10,
            Self::Summarizing => 0.30,
            Self::Finalizing => 0.05,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Clustering => "clustering",
            Self::Summarizing => "summarizing",
            Self::Finalizing => "finalizing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
}

impl ProgressEvent {
    /// Monotonic overall fraction in `[0, 1]`; later phases always report
    /// higher fractions than earlier ones.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        let within = if self.total == 0 {
            1.0
        } else {
            (self.processed as f32 / self.total as f32).min(1.0)
        };
        self.phase.base() + self.phase.weight() * within
    }
}

/// Observer callback for build progress. Cheap to clone, invoked inline.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub(crate) fn report(sink: Option<&ProgressSink>, phase: Phase, processed: usize, total: usize) {
    if let Some(sink) = sink {
        sink(ProgressEvent {
            phase,
            processed,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_bases_cover_unit_interval() {
        assert_eq!(Phase::Embedding.base(), 0.0);
        let end = Phase::Finalizing.base() + Phase::Finalizing.weight();
        assert!((end - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fraction_is_monotonic_across_phases() {
        let embed_done = ProgressEvent {
            phase: Phase::Embedding,
            processed: 10,
            total: 10,
        };
        let summarize_start = ProgressEvent {
            phase: Phase::Summarizing,
            processed: 0,
            total: 4,
        };
        assert!(summarize_start.fraction() >= embed_done.fraction());
    }

    #[test]
    fn zero_total_counts_as_complete() {
        let event = ProgressEvent {
            phase: Phase::Clustering,
            processed: 0,
            total: 0,
        };
        assert!((event.fraction() - 0.65).abs() < 1e-6);
    }

    #[test]
    fn fraction_clamps_overcounts() {
        let event = ProgressEvent {
            phase: Phase::Embedding,
            processed: 15,
            total: 10,
        };
        assert!(event.fraction() <= 0.55 + 1e-6);
    }
}
