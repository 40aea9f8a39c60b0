//! Outcome taxonomy returned to callers of `resolve`.
//!
//! Every failure path inside the pipeline ends in one of these values.

use serde::Serialize;
use thiserror::Error;

/// Why admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum Overloaded {
    #[error("all {limit} slots busy and queue full")]
    QueueFull { limit: usize },

    #[error("waited {waited_ms}ms in queue without a slot")]
    QueueTimeout { waited_ms: u64 },

    #[error("admission closed")]
    Closed,
}

/// Resolution failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No candidate cleared the acceptance threshold
    #[error("No matching trailer found")]
    NotFound,

    /// A candidate was accepted but every backend failed within budget
    #[error("All {attempts} extraction attempts failed")]
    ExtractionExhausted { attempts: usize },

    /// Extraction chain ran out of its total budget
    #[error("Extraction budget exceeded after {elapsed_ms}ms")]
    TotalTimeout { elapsed_ms: u64 },

    /// Admission rejected due to capacity
    #[error("Overloaded: {0}")]
    Overloaded(#[from] Overloaded),

    /// Whole request exceeded the pipeline budget
    #[error("Request exceeded pipeline budget of {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    /// Metadata or search provider failure
    #[error("Upstream provider error: {0}")]
    UpstreamError(String),
}

impl ResolveError {
    /// Stable machine-readable kind for response bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ExtractionExhausted { .. } => "extraction_exhausted",
            Self::TotalTimeout { .. } => "total_timeout",
            Self::Overloaded(_) => "overloaded",
            Self::Timeout { .. } => "timeout",
            Self::UpstreamError(_) => "upstream_error",
        }
    }

    /// Expected outcomes that are not failures of this service
    pub fn is_negative_result(&self) -> bool {
        matches!(self, Self::NotFound | Self::ExtractionExhausted { .. })
    }
}
