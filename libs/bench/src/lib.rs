//! ANN vector database benchmark harness.
//!
//! Phases, each usable on its own:
//!
//! 1. [`generate`] - deterministic synthetic payloads and query filters for a
//!    fixed vector dataset
//! 2. [`ingest`] - load reference vectors and payloads into a backend
//! 3. [`driver`] - concurrent query load through the [`provider`] layer,
//!    every query appended to a result log keyed by a [`BenchmarkId`]
//! 4. [`evaluate`] - brute-force ground truth and Recall@k over the logs
//!
//! ```ignore
//! use vdbench::{AugmentedDataset, Dataset, GenerationSettings};
//!
//! let dataset = Dataset::load(data_dir, usize::MAX, usize::MAX)?;
//! let augmented = AugmentedDataset::generate(&GenerationSettings::default(), &dataset)?;
//! augmented.write(&AugmentedDataset::default_dir(&dataset.base_source.path))?;
//! ```

pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod evaluate;
pub mod generate;
pub mod ground_truth;
pub mod identifier;
pub mod ids;
pub mod ingest;
pub mod metrics;
pub mod provider;
pub mod report;

pub use config::{GenerationSettings, ProviderConfig};
pub use dataset::Dataset;
pub use driver::{run_load, LoadConfig, QueryOutcome, ResultLogEntry, RunSummary, Workload};
pub use error::{BenchmarkIdError, GenerationError, IdField, Result};
pub use evaluate::{Evaluator, RecallReport};
pub use generate::{AugmentedDataset, DocumentPayload, QueryFilter, QuerySample};
pub use identifier::BenchmarkId;
pub use ingest::{ingest, IngestConfig, IngestSummary};
pub use provider::{ProviderKind, SearchHit, SearchRequest, VectorDatabase};
pub use report::ReportLayout;
