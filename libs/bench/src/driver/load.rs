//! Concurrent load driver.
//!
//! `num_tasks` workers run in parallel. Each issues its share of the
//! [`QueryPlan`] strictly sequentially: build request, await `search`, send
//! the entry to the result log. Latency covers the `search` call only.
//!
//! Workers share the read-only [`Workload`] and a [`LogWriter`] handle, and
//! nothing else. Each keeps its own latencies and hands them back when it
//! finishes; throughput is derived afterwards from the wall-clock span.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::dataset::Dataset;
use crate::generate::{AugmentedDataset, QuerySample};
use crate::identifier::BenchmarkId;
use crate::metrics::{compute_qps, LatencyStats};
use crate::provider::{SearchRequest, VectorDatabase};

use super::log::{LogWriter, QueryOutcome, ResultLogEntry};
use super::sampler::{QueryPlan, QueryRecord};

/// Seed of the query plan when none is configured.
pub const DEFAULT_PLAN_SEED: u64 = 0x5eed_0f_10ad;

// ============================================================================
// LoadConfig
// ============================================================================

/// Configuration for one load run.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Seed of the query plan; identical seeds replay identical queries
    pub plan_seed: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            plan_seed: DEFAULT_PLAN_SEED,
        }
    }
}

impl LoadConfig {
    pub fn with_plan_seed(mut self, seed: u64) -> Self {
        self.plan_seed = seed;
        self
    }
}

// ============================================================================
// Workload
// ============================================================================

/// Query vectors and their samples, read-only for the whole run.
#[derive(Debug, Clone)]
pub struct Workload {
    query_vectors: Vec<Vec<f32>>,
    samples: Vec<QuerySample>,
}

impl Workload {
    /// Fails if a sample points at a query vector that does not exist.
    pub fn new(query_vectors: Vec<Vec<f32>>, samples: Vec<QuerySample>) -> Result<Self> {
        if let Some(sample) = samples
            .iter()
            .find(|s| s.query_vector_id as usize >= query_vectors.len())
        {
            bail!(
                "Query sample references vector {} but only {} query vectors are loaded",
                sample.query_vector_id,
                query_vectors.len()
            );
        }
        Ok(Self {
            query_vectors,
            samples,
        })
    }

    pub fn from_augmented(dataset: &Dataset, augmented: &AugmentedDataset) -> Result<Self> {
        augmented.ensure_matches(dataset)?;
        Self::new(dataset.query_vectors.clone(), augmented.queries.clone())
    }

    pub fn samples(&self) -> &[QuerySample] {
        &self.samples
    }

    pub fn query_vector(&self, id: u64) -> Option<&[f32]> {
        self.query_vectors.get(id as usize).map(Vec::as_slice)
    }
}

// ============================================================================
// Run
// ============================================================================

/// Aggregate of one load run, stored as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub benchmark_id: BenchmarkId,
    pub plan_seed: u64,
    pub total_queries: usize,
    pub failures: usize,
    pub wall_clock_ms: f64,
    /// `total_queries / wall_clock`
    pub throughput_qps: f64,
    /// Latencies of successful queries
    pub latency: LatencyStats,
}

impl RunSummary {
    pub fn successes(&self) -> usize {
        self.total_queries - self.failures
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    latencies_ms: Vec<f64>,
    issued: usize,
    failures: usize,
}

/// Drive the query plan for `id` against `db`.
///
/// Returns once every worker finished and the log has flushed every entry.
#[tracing::instrument(skip_all, fields(benchmark_id = %id, provider = db.name()))]
pub async fn run_load(
    db: Arc<dyn VectorDatabase>,
    workload: Arc<Workload>,
    id: &BenchmarkId,
    config: &LoadConfig,
    writer: &LogWriter,
) -> Result<RunSummary> {
    id.query.ensure_ef_covers_k()?;
    let plan = Arc::new(QueryPlan::new(
        config.plan_seed,
        workload.samples().len(),
        &id.parallelism,
    ));
    if plan.total_queries() == 0 {
        tracing::warn!("Query plan is empty - no query samples available");
    }

    let start = Instant::now();
    let mut handles: Vec<JoinHandle<Result<WorkerReport>>> = Vec::new();
    for worker in 0..plan.num_workers() {
        let db = Arc::clone(&db);
        let workload = Arc::clone(&workload);
        let plan = Arc::clone(&plan);
        let writer = writer.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            query_worker(db, workload, plan, id, worker, writer).await
        }));
    }

    let mut latencies_ms = Vec::with_capacity(plan.total_queries());
    let mut total_queries = 0;
    let mut failures = 0;
    for handle in handles {
        let report = handle.await.context("Query worker panicked")??;
        latencies_ms.extend(report.latencies_ms);
        total_queries += report.issued;
        failures += report.failures;
    }
    let wall_clock = start.elapsed();

    writer.flush().await?;

    let summary = RunSummary {
        benchmark_id: id.clone(),
        plan_seed: config.plan_seed,
        total_queries,
        failures,
        wall_clock_ms: wall_clock.as_secs_f64() * 1000.0,
        throughput_qps: compute_qps(total_queries, wall_clock.as_secs_f64() * 1000.0),
        latency: LatencyStats::from_latencies(&latencies_ms),
    };
    if failures > 0 {
        tracing::warn!(failures, total = total_queries, "Some queries failed");
    }
    tracing::info!(
        queries = total_queries,
        qps = format!("{:.1}", summary.throughput_qps),
        latency = %summary.latency.summary(),
        "Load run finished"
    );
    Ok(summary)
}

async fn query_worker(
    db: Arc<dyn VectorDatabase>,
    workload: Arc<Workload>,
    plan: Arc<QueryPlan>,
    id: BenchmarkId,
    worker: usize,
    writer: LogWriter,
) -> Result<WorkerReport> {
    let mut report = WorkerReport::default();

    for (sequence, record) in plan.records(worker, workload.samples(), &id.query).enumerate() {
        let vector = workload
            .query_vector(record.query_vector_id)
            .with_context(|| format!("Missing query vector {}", record.query_vector_id))?;
        let request = SearchRequest {
            vector,
            filter: record.filter.as_ref(),
            k: record.k as usize,
            ef: record.ef as usize,
            fetch_payload: record.fetch_payload,
        };

        let op_start = Instant::now();
        let result = db.search(&request).await;
        let latency = op_start.elapsed();

        report.issued += 1;
        let outcome = match result {
            Ok(hits) => {
                report.latencies_ms.push(millis(latency));
                QueryOutcome::Success {
                    payload_present: hits.iter().any(|hit| hit.payload.is_some()),
                    returned_ids: hits.into_iter().map(|hit| hit.id).collect(),
                }
            }
            Err(e) => {
                report.failures += 1;
                tracing::debug!(worker, query_index = record.query_index, error = %e, "Query failed");
                QueryOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        writer
            .send(entry(&id, worker, sequence, &record, latency, outcome))
            .await?;
    }
    Ok(report)
}

fn entry(
    id: &BenchmarkId,
    worker: usize,
    sequence: usize,
    record: &QueryRecord,
    latency: Duration,
    outcome: QueryOutcome,
) -> ResultLogEntry {
    ResultLogEntry {
        benchmark_id: id.clone(),
        worker: worker as u32,
        sequence: sequence as u32,
        query_index: record.query_index,
        query_vector_id: record.query_vector_id,
        filtered: record.filter.is_some(),
        k: record.k,
        latency_ms: millis(latency),
        finished_at_ms: chrono::Utc::now().timestamp_millis(),
        outcome,
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
