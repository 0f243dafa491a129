//! Error types for the benchmark harness.
//!
//! Plumbing (I/O, HTTP, serialization) uses `anyhow::Result` with context.
//! Failures the operator has to act on get a typed error naming the culprit.

use std::fmt;

use anyhow::{anyhow, bail};
use thiserror::Error;

/// Convenience re-export of anyhow::Result
pub use anyhow::Result;

/// Field of a benchmark identifier, used to report where parsing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    Provider,
    BenchGroup,
    M,
    EfConstruction,
    CpuLimit,
    MemLimit,
    K,
    Ef,
    FetchPayload,
    UseFilters,
    NumTasks,
    QueriesPerTask,
}

impl IdField {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdField::Provider => "provider",
            IdField::BenchGroup => "bench_group",
            IdField::M => "m",
            IdField::EfConstruction => "ef_construction",
            IdField::CpuLimit => "cpu_limit",
            IdField::MemLimit => "mem_limit",
            IdField::K => "k",
            IdField::Ef => "ef",
            IdField::FetchPayload => "fetch_flag",
            IdField::UseFilters => "filter_flag",
            IdField::NumTasks => "num_tasks",
            IdField::QueriesPerTask => "queries_per_task",
        }
    }
}

impl fmt::Display for IdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Benchmark identifier grammar violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BenchmarkIdError {
    #[error("benchmark id is {len} characters long, the limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("benchmark id ends before `{separator}` following {field}")]
    MissingSeparator { field: IdField, separator: char },

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: IdField,
        value: String,
        reason: &'static str,
    },
}

impl BenchmarkIdError {
    /// The field that failed, if the error is tied to one.
    pub fn field(&self) -> Option<IdField> {
        match self {
            BenchmarkIdError::TooLong { .. } => None,
            BenchmarkIdError::MissingSeparator { field, .. }
            | BenchmarkIdError::InvalidField { field, .. } => Some(*field),
        }
    }

    pub(crate) fn invalid(field: IdField, value: &str, reason: &'static str) -> Self {
        BenchmarkIdError::InvalidField {
            field,
            value: value.to_string(),
            reason,
        }
    }
}

/// Fatal precondition failure while generating payloads and filters.
///
/// Nothing is persisted once one of these is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("query {query_index}: {field} filter includes and excludes the same labels {labels:?}")]
    OverlappingLabels {
        query_index: usize,
        field: &'static str,
        labels: Vec<u32>,
    },

    #[error("{field}: cannot sample {requested} unique labels from a population of {population} (limit {limit})")]
    Cardinality {
        field: &'static str,
        requested: usize,
        population: usize,
        limit: usize,
    },

    #[error("{name}: {reason}")]
    InvalidDistribution { name: &'static str, reason: String },

    #[error("date range is empty: min {min} is not before max {max}")]
    EmptyDateRange { min: i64, max: i64 },
}

/// Create a dimension mismatch error
pub fn dimension_mismatch(expected: usize, got: usize) -> anyhow::Error {
    anyhow!("Dimension mismatch: expected {}, got {}", expected, got)
}

/// Create an unknown provider error
pub fn unknown_provider(name: &str) -> anyhow::Error {
    anyhow!(
        "Unknown provider: {} (expected one of qdrant, elasticsearch, vespa, exact)",
        name
    )
}

/// Bail if vector dimension doesn't match expected
#[inline]
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        bail!(
            "Dimension mismatch: expected {}, got {}",
            expected,
            vector.len()
        );
    }
    Ok(())
}
