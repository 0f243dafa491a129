//! Ingestion phase.
//!
//! Creates the collection with the HNSW build parameters when it is missing,
//! upserts every reference vector with its payload in fixed-size batches and
//! waits for the backend to finish indexing. An existing collection is left
//! untouched.

use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::generate::DocumentPayload;
use crate::identifier::IngestionParameters;
use crate::metrics::Welford;
use crate::provider::{Point, VectorDatabase, INGEST_BATCH_SIZE};

/// Configuration for an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub params: IngestionParameters,
    /// Points per upsert request
    pub batch_size: usize,
    /// Upper bound on waiting for the index to become ready
    pub max_wait: Duration,
    /// Seconds between progress lines
    pub progress_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            params: IngestionParameters::default(),
            batch_size: INGEST_BATCH_SIZE,
            max_wait: Duration::from_secs(3600),
            progress_interval: Duration::from_secs(10),
        }
    }
}

impl IngestConfig {
    pub fn with_params(mut self, params: IngestionParameters) -> Self {
        self.params = params;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Mean and spread of per-batch upsert times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTiming {
    pub batches: u64,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub sample_variance_ms2: f64,
}

impl From<&Welford> for BatchTiming {
    fn from(w: &Welford) -> Self {
        Self {
            batches: w.count(),
            mean_ms: w.mean().unwrap_or_default(),
            std_dev_ms: w.std_dev().unwrap_or_default(),
            sample_variance_ms2: w.sample_variance().unwrap_or_default(),
        }
    }
}

/// Outcome of the ingestion phase, stored as `ingest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub provider: String,
    pub params: IngestionParameters,
    /// `false` when the collection already existed and nothing was sent
    pub created: bool,
    pub vectors: usize,
    pub upsert_ms: f64,
    /// Time spent waiting for indexing after the last upsert
    pub index_wait_ms: f64,
    pub batch_timing: BatchTiming,
}

/// Ingest `vectors` (id = position) with their `payloads` into `db`.
#[tracing::instrument(skip_all, fields(provider = db.name(), vectors = vectors.len()))]
pub async fn ingest(
    db: &dyn VectorDatabase,
    vectors: &[Vec<f32>],
    payloads: &[DocumentPayload],
    config: &IngestConfig,
) -> Result<IngestSummary> {
    ensure!(
        vectors.len() == payloads.len(),
        "{} vectors but {} payloads - augmented dataset does not match",
        vectors.len(),
        payloads.len()
    );
    ensure!(config.batch_size > 0, "Batch size must be positive");
    let dim = vectors.first().map_or(0, Vec::len);

    let mut summary = IngestSummary {
        provider: db.name().to_string(),
        params: config.params,
        created: false,
        vectors: 0,
        upsert_ms: 0.0,
        index_wait_ms: 0.0,
        batch_timing: BatchTiming::default(),
    };

    let created = db
        .initialize(&config.params, dim)
        .await
        .context("Failed to initialize collection")?;
    if !created {
        tracing::info!("Collection exists, skipping ingestion");
        return Ok(summary);
    }
    summary.created = true;

    db.prepare_ingestion().await?;

    let start = Instant::now();
    let mut last_progress = Instant::now();
    let mut timing = Welford::new();
    for (batch_index, chunk) in vectors.chunks(config.batch_size).enumerate() {
        let offset = batch_index * config.batch_size;
        let points: Vec<Point<'_>> = chunk
            .iter()
            .zip(&payloads[offset..])
            .enumerate()
            .map(|(i, (vector, payload))| Point {
                id: (offset + i) as u64,
                vector,
                payload,
            })
            .collect();

        let batch_start = Instant::now();
        db.upsert_batch(&points)
            .await
            .with_context(|| format!("Upsert of batch starting at {} failed", offset))?;
        timing.update(batch_start.elapsed().as_secs_f64() * 1000.0);
        summary.vectors += points.len();

        if last_progress.elapsed() >= config.progress_interval {
            let rate = summary.vectors as f64 / start.elapsed().as_secs_f64().max(0.0001);
            tracing::info!(
                sent = summary.vectors,
                total = vectors.len(),
                rate = format!("{:.1} vec/s", rate),
                "Ingest progress"
            );
            last_progress = Instant::now();
        }
    }
    summary.upsert_ms = start.elapsed().as_secs_f64() * 1000.0;
    summary.batch_timing = BatchTiming::from(&timing);

    let wait_start = Instant::now();
    db.finish_ingestion(config.max_wait)
        .await
        .context("Index did not become ready")?;
    summary.index_wait_ms = wait_start.elapsed().as_secs_f64() * 1000.0;

    tracing::info!(
        vectors = summary.vectors,
        batches = summary.batch_timing.batches,
        mean_batch_ms = format!("{:.2}", summary.batch_timing.mean_ms),
        "Ingestion finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ExactSearch, SearchRequest};

    fn payloads(n: usize) -> Vec<DocumentPayload> {
        (0..n)
            .map(|i| DocumentPayload {
                publication_date: i as i64,
                authors: Default::default(),
                tags: Default::default(),
                link: format!("doc{}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_in_batches() {
        let db = ExactSearch::new();
        let vectors: Vec<Vec<f32>> = (0..250).map(|i| vec![i as f32, 0.0]).collect();
        let summary = ingest(&db, &vectors, &payloads(250), &IngestConfig::default())
            .await
            .unwrap();

        assert!(summary.created);
        assert_eq!(summary.vectors, 250);
        assert_eq!(summary.batch_timing.batches, 3);
        assert_eq!(db.len(), 250);

        let hits = db
            .search(&SearchRequest {
                vector: &[249.0, 0.0],
                filter: None,
                k: 1,
                ef: 1,
                fetch_payload: true,
            })
            .await
            .unwrap();
        assert_eq!(hits[0].id, 249);
        assert_eq!(hits[0].payload.as_ref().unwrap().link, "doc249");
    }

    #[tokio::test]
    async fn test_existing_collection_is_skipped() {
        let db = ExactSearch::new();
        let vectors = vec![vec![1.0]];
        ingest(&db, &vectors, &payloads(1), &IngestConfig::default())
            .await
            .unwrap();
        let again = ingest(&db, &vectors, &payloads(1), &IngestConfig::default())
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.vectors, 0);
    }

    #[tokio::test]
    async fn test_payload_count_must_match() {
        let db = ExactSearch::new();
        let vectors = vec![vec![1.0], vec![2.0]];
        assert!(ingest(&db, &vectors, &payloads(1), &IngestConfig::default())
            .await
            .is_err());
    }
}
