//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vdbench::dataset::{write_fvecs, GIST_BASE_FILE, GIST_QUERY_FILE};
use vdbench::identifier::{
    IngestionParameters, Parallelism, QueryParameters, ResourceLimits,
};
use vdbench::provider::{ExactSearch, Point};
use vdbench::{BenchmarkId, Dataset, QueryFilter, SearchHit, SearchRequest, VectorDatabase};

pub const DIM: usize = 16;

pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

/// Write a small GIST-shaped dataset into `dir` and load it back.
pub fn write_dataset(dir: &Path, num_base: usize, num_queries: usize) -> Dataset {
    std::fs::create_dir_all(dir).unwrap();
    write_fvecs(&dir.join(GIST_BASE_FILE), &random_vectors(num_base, DIM, 1)).unwrap();
    write_fvecs(&dir.join(GIST_QUERY_FILE), &random_vectors(num_queries, DIM, 2)).unwrap();
    Dataset::load(dir, usize::MAX, usize::MAX).unwrap()
}

pub fn benchmark_id(
    provider: &str,
    query: QueryParameters,
    num_tasks: u32,
    queries_per_task: u32,
) -> BenchmarkId {
    BenchmarkId {
        provider: provider.to_string(),
        bench_group: "integration".to_string(),
        ingestion: IngestionParameters::default(),
        limits: ResourceLimits::default(),
        query,
        parallelism: Parallelism {
            num_tasks,
            queries_per_task,
        },
    }
}

pub fn query_params(k: u32, use_filters: bool) -> QueryParameters {
    QueryParameters {
        k,
        ef: k * 2,
        fetch_payload: false,
        use_filters,
    }
}

/// A search request as seen by a provider.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct RecordedSearch {
    pub vector: Vec<f32>,
    pub filter: Option<String>,
    pub k: usize,
    pub ef: usize,
}

/// Exact search that remembers every request it served.
pub struct RecordingProvider {
    name: &'static str,
    inner: ExactSearch,
    seen: Mutex<Vec<RecordedSearch>>,
}

impl RecordingProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: ExactSearch::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Requests served so far, sorted so runs compare independent of scheduling.
    pub fn sorted_requests(&self) -> Vec<RecordedSearch> {
        let mut seen = self.seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        seen
    }
}

#[async_trait]
impl VectorDatabase for RecordingProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self, params: &IngestionParameters, dim: usize) -> Result<bool> {
        self.inner.initialize(params, dim).await
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()> {
        self.inner.upsert_batch(points).await
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        self.seen.lock().unwrap().push(RecordedSearch {
            vector: request.vector.to_vec(),
            filter: request.filter.map(|f: &QueryFilter| serde_json::to_string(f).unwrap()),
            k: request.k,
            ef: request.ef,
        });
        self.inner.search(request).await
    }
}
