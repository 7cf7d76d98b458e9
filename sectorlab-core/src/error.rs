//! Structured errors for the analysis pipeline.
//!
//! Every variant is local to one symbol's analysis. Callers capture these
//! into the symbol's result instead of aborting a batch.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("insufficient data: need at least {required} data points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("degenerate clustering: expected {expected} distinct centroids, got {distinct}")]
    DegenerateCluster { expected: usize, distinct: usize },

    #[error("invalid bars: {0}")]
    InvalidBars(String),
}
