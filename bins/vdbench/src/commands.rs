//! Subcommand arguments and handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use vdbench::config::ProviderConfig;
use vdbench::driver::sweep::{
    query_throughput_ids, DEFAULT_NUM_TASKS, DEFAULT_QUERIES_PER_TASK, QUERY_THROUGHPUT_GROUP,
};
use vdbench::driver::{open_result_log, LogWriterConfig, DEFAULT_PLAN_SEED};
use vdbench::identifier::{IngestionParameters, Parallelism, QueryParameters};
use vdbench::ids::index_to_fake_uuid;
use vdbench::provider::INGEST_BATCH_SIZE;
use vdbench::report::{ReportLayout, RunDir, DEFAULT_REPORTS_DIR};
use vdbench::{
    run_load, AugmentedDataset, BenchmarkId, Dataset, Evaluator, GenerationSettings, IngestConfig,
    IngestSummary, LoadConfig, ProviderKind, RunSummary, VectorDatabase, Workload,
};
use vdbench_core::distance::Metric;

const RUN_FILE: &str = "run.json";
const INGEST_FILE: &str = "ingest.json";

// ============================================================================
// Shared arguments
// ============================================================================

/// Location and size of the vector dataset.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Directory holding gist_base.fvecs and gist_query.fvecs
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Augmented dataset directory (default: next to the base vectors)
    #[arg(long)]
    pub augmented_dir: Option<PathBuf>,

    /// Read at most this many reference vectors
    #[arg(long)]
    pub max_base: Option<usize>,

    /// Read at most this many query vectors
    #[arg(long)]
    pub max_queries: Option<usize>,
}

impl DataArgs {
    fn load_dataset(&self) -> Result<Dataset> {
        Dataset::load(
            &self.data_dir,
            self.max_base.unwrap_or(usize::MAX),
            self.max_queries.unwrap_or(usize::MAX),
        )
    }

    fn augmented_dir(&self, dataset: &Dataset) -> PathBuf {
        self.augmented_dir
            .clone()
            .unwrap_or_else(|| AugmentedDataset::default_dir(&dataset.base_source.path))
    }

    /// Load the vectors and the augmented dataset generated from them.
    fn load(&self) -> Result<(Dataset, AugmentedDataset)> {
        let dataset = self.load_dataset()?;
        let dir = self.augmented_dir(&dataset);
        let augmented = AugmentedDataset::load(&dir)
            .with_context(|| format!("No augmented dataset at {:?}. Run 'generate' first.", dir))?;
        augmented.ensure_matches(&dataset)?;
        Ok((dataset, augmented))
    }
}

/// Backend selection and the cluster it runs on.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Backend: qdrant, elasticsearch, vespa or exact
    #[arg(long)]
    pub provider: ProviderKind,

    #[arg(long, env = "VDBENCH_QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    #[arg(long, env = "VDBENCH_ELASTICSEARCH_URL", default_value = "http://localhost:9200")]
    pub elasticsearch_url: String,

    #[arg(long, env = "VDBENCH_VESPA_URL", default_value = "http://localhost:8080")]
    pub vespa_url: String,

    /// CPU cores of the cluster, recorded in the benchmark id
    #[arg(long, env = "VDBENCH_LIMIT_CPUS", default_value = "4.00")]
    pub limit_cpus: f64,

    /// Memory of the cluster in GiB, recorded in the benchmark id
    #[arg(long, env = "VDBENCH_LIMIT_MEM", default_value = "8.00")]
    pub limit_mem: f64,
}

impl ProviderArgs {
    fn config(&self) -> Result<ProviderConfig> {
        ProviderConfig {
            qdrant_url: self.qdrant_url.clone(),
            elasticsearch_url: self.elasticsearch_url.clone(),
            vespa_url: self.vespa_url.clone(),
            ..ProviderConfig::default()
        }
        .with_limits(self.limit_cpus, self.limit_mem)
    }
}

/// HNSW build parameters.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Max links per node
    #[arg(long, default_value = "16")]
    pub m: u32,

    /// Candidates explored at insert time
    #[arg(long, default_value = "100")]
    pub ef_construction: u32,
}

impl IndexArgs {
    fn params(&self) -> IngestionParameters {
        IngestionParameters {
            m: self.m,
            ef_construction: self.ef_construction,
        }
    }
}

/// Worker layout and report destination of load runs.
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Concurrent workers
    #[arg(long, default_value_t = DEFAULT_NUM_TASKS)]
    pub tasks: u32,

    /// Sequential queries per worker
    #[arg(long, default_value_t = DEFAULT_QUERIES_PER_TASK)]
    pub queries_per_task: u32,

    /// Seed of the query plan; equal seeds replay equal queries on every backend
    #[arg(long, default_value_t = DEFAULT_PLAN_SEED)]
    pub plan_seed: u64,

    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    pub reports_dir: PathBuf,
}

impl LoadArgs {
    fn parallelism(&self) -> Parallelism {
        Parallelism {
            num_tasks: self.tasks,
            queries_per_task: self.queries_per_task,
        }
    }
}

// ============================================================================
// Generate
// ============================================================================

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Generation settings TOML (default: built-in settings)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the seed from the settings file
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn generate(args: GenerateArgs) -> Result<()> {
    println!("=== Generate Payloads ===");

    let mut settings = match &args.settings {
        Some(path) => GenerationSettings::load(path)?,
        None => GenerationSettings::default(),
    };
    if let Some(seed) = args.seed {
        settings = settings.with_seed(seed);
    }
    println!("Seed: {}", settings.seed);

    let dataset = args.data.load_dataset()?;
    let augmented = AugmentedDataset::generate(&settings, &dataset)?;
    let dir = args.data.augmented_dir(&dataset);
    augmented.write(&dir)?;

    let manifest = &augmented.manifest;
    println!("Documents:        {}", manifest.num_documents);
    println!(
        "Queries:          {} ({} filtered)",
        manifest.num_queries, manifest.num_filtered_queries
    );
    println!("Base checksum:    {}", manifest.base_vectors.checksum);
    println!("Written to:       {:?}", dir);
    Ok(())
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Parser, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub index: IndexArgs,

    /// Points per upsert request
    #[arg(long, default_value_t = INGEST_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds to wait for the index to become ready
    #[arg(long, default_value = "3600")]
    pub max_wait_secs: u64,

    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    pub reports_dir: PathBuf,
}

pub async fn ingest(args: IngestArgs) -> Result<()> {
    println!("=== Ingest ===");
    let kind = args.provider.provider;
    let config = args.provider.config()?;
    println!("Provider: {}", kind);

    let (dataset, augmented) = args.data.load()?;
    let db = kind.connect(&config)?;
    let ingest_config = IngestConfig::default()
        .with_params(args.index.params())
        .with_batch_size(args.batch_size)
        .with_max_wait(Duration::from_secs(args.max_wait_secs));

    let layout = ReportLayout::new(&args.reports_dir);
    let run = layout.open_run(kind.as_str(), "ingest")?;
    let result = ingest_into(db.as_ref(), &dataset, &augmented, &ingest_config).await;
    finish_ingest_run(run, result)
}

async fn ingest_into(
    db: &dyn VectorDatabase,
    dataset: &Dataset,
    augmented: &AugmentedDataset,
    config: &IngestConfig,
) -> Result<IngestSummary> {
    let summary = vdbench::ingest(db, &dataset.base_vectors, &augmented.documents, config).await?;
    print_ingest(&summary);
    Ok(summary)
}

fn finish_ingest_run(run: RunDir, result: Result<IngestSummary>) -> Result<()> {
    match result {
        Ok(summary) => {
            run.write_json(INGEST_FILE, &summary)?;
            println!("Report: {:?}", run.path());
            run.close(true)
        }
        Err(e) => {
            run.close(false)?;
            Err(e)
        }
    }
}

fn print_ingest(summary: &IngestSummary) {
    if !summary.created {
        println!("Collection already exists, nothing ingested");
        return;
    }
    println!("Vectors:     {}", summary.vectors);
    println!("Upsert:      {:.1}s", summary.upsert_ms / 1000.0);
    println!("Index wait:  {:.1}s", summary.index_wait_ms / 1000.0);
    println!(
        "Batches:     {} (mean {:.2}ms, std dev {:.2}ms)",
        summary.batch_timing.batches, summary.batch_timing.mean_ms, summary.batch_timing.std_dev_ms
    );
}

// ============================================================================
// Query / Sweep
// ============================================================================

#[derive(Parser, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub index: IndexArgs,

    #[command(flatten)]
    pub load: LoadArgs,

    /// Number of results per query
    #[arg(long, default_value = "20")]
    pub k: u32,

    /// ef (num_candidates for elasticsearch), defaults to k and must not be below it
    #[arg(long)]
    pub ef: Option<u32>,

    /// Return stored payloads with each hit
    #[arg(long)]
    pub fetch_payload: bool,

    /// Apply the generated metadata filters
    #[arg(long)]
    pub filters: bool,

    /// Benchmark group recorded in the id
    #[arg(long, default_value = QUERY_THROUGHPUT_GROUP)]
    pub group: String,
}

pub async fn query(args: QueryArgs) -> Result<()> {
    println!("=== Query Load ===");
    let kind = args.provider.provider;
    let config = args.provider.config()?;

    let id = BenchmarkId {
        provider: kind.as_str().to_string(),
        bench_group: args.group.clone(),
        ingestion: args.index.params(),
        limits: config.limits,
        query: QueryParameters {
            k: args.k,
            ef: args.ef.unwrap_or(args.k),
            fetch_payload: args.fetch_payload,
            use_filters: args.filters,
        },
        parallelism: args.load.parallelism(),
    };
    id.validate()?;
    id.query.ensure_ef_covers_k()?;
    println!("Benchmark: {}", id);

    run_benchmarks(kind, &config, &args.data, &args.index, &args.load, &[id], "query").await
}

#[derive(Parser, Debug)]
pub struct SweepArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub index: IndexArgs,

    #[command(flatten)]
    pub load: LoadArgs,
}

pub async fn sweep(args: SweepArgs) -> Result<()> {
    println!("=== Query Throughput Sweep ===");
    let kind = args.provider.provider;
    let config = args.provider.config()?;

    let ids = query_throughput_ids(
        kind.as_str(),
        args.index.params(),
        config.limits,
        args.load.parallelism(),
    );
    for id in &ids {
        id.validate()?;
        id.query.ensure_ef_covers_k()?;
    }
    println!("Provider: {}, {} configurations", kind, ids.len());

    run_benchmarks(kind, &config, &args.data, &args.index, &args.load, &ids, "sweep").await
}

/// Run `ids` one after another into a single run directory.
async fn run_benchmarks(
    kind: ProviderKind,
    config: &ProviderConfig,
    data: &DataArgs,
    index: &IndexArgs,
    load: &LoadArgs,
    ids: &[BenchmarkId],
    command: &str,
) -> Result<()> {
    let (dataset, augmented) = data.load()?;
    let db = kind.connect(config)?;
    let layout = ReportLayout::new(&load.reports_dir);
    let run = layout.open_run(kind.as_str(), command)?;

    // The exact backend lives in this process and starts out empty.
    if kind == ProviderKind::Exact {
        let ingest_config = IngestConfig::default().with_params(index.params());
        match ingest_into(db.as_ref(), &dataset, &augmented, &ingest_config).await {
            Ok(summary) => {
                run.write_json(INGEST_FILE, &summary)?;
            }
            Err(e) => {
                run.close(false)?;
                return Err(e);
            }
        }
    }

    let workload = Arc::new(Workload::from_augmented(&dataset, &augmented)?);
    drop(dataset);

    let load_config = LoadConfig::default().with_plan_seed(load.plan_seed);
    let result = drive(db, workload, ids, &layout, kind, &load_config).await;

    match result {
        Ok(summaries) => {
            run.write_json(RUN_FILE, &summaries)?;
            println!();
            println!("Result log: {:?}", layout.result_log(kind.as_str()));
            println!("Report:     {:?}", run.path());
            let success = summaries.iter().all(|s| s.failures == 0);
            run.close(success)
        }
        Err(e) => {
            run.close(false)?;
            Err(e)
        }
    }
}

async fn drive(
    db: Arc<dyn VectorDatabase>,
    workload: Arc<Workload>,
    ids: &[BenchmarkId],
    layout: &ReportLayout,
    kind: ProviderKind,
    config: &LoadConfig,
) -> Result<Vec<RunSummary>> {
    let (writer, consumer) =
        open_result_log(&layout.result_log(kind.as_str()), &LogWriterConfig::default()).await?;

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        let summary = run_load(Arc::clone(&db), Arc::clone(&workload), id, config, &writer).await?;
        print_run(&summary);
        summaries.push(summary);
    }

    drop(writer);
    let written = consumer.await.context("Result log consumer panicked")??;
    tracing::info!(entries = written, "Result log closed");
    Ok(summaries)
}

fn print_run(summary: &RunSummary) {
    println!();
    println!("{}", summary.benchmark_id);
    println!(
        "  queries={} failures={} wall={:.1}ms qps={:.1}",
        summary.total_queries, summary.failures, summary.wall_clock_ms, summary.throughput_qps
    );
    println!("  latency: {}", summary.latency.summary());
}

// ============================================================================
// Evaluate
// ============================================================================

#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    pub reports_dir: PathBuf,

    /// Distance the indexes were built with
    #[arg(long, default_value = "euclidean")]
    pub metric: Metric,

    /// Print the reports as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn evaluate(args: EvaluateArgs) -> Result<()> {
    if !args.json {
        println!("=== Recall Evaluation ===");
    }
    let dataset = args.data.load_dataset()?;
    let augmented_dir = args.data.augmented_dir(&dataset);
    if augmented_dir.exists() {
        AugmentedDataset::load(&augmented_dir)?.ensure_matches(&dataset)?;
    } else {
        tracing::warn!(dir = %augmented_dir.display(), "No augmented dataset, vector checksums not verified");
    }

    let root = args.reports_dir.clone();
    let metric = args.metric;
    let reports = tokio::task::spawn_blocking(move || {
        let mut evaluator = Evaluator::new(&dataset.base_vectors, &dataset.query_vectors, metric);
        evaluator.evaluate_tree(&root)
    })
    .await
    .context("Evaluation task panicked")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        print_report_header(&report.source);
        println!(
            "  evaluated={} filtered={} failed={} integrity_errors={} malformed={}",
            report.evaluated,
            report.skipped_filtered,
            report.skipped_failed,
            report.integrity_errors,
            report.malformed_lines
        );
        for bench in &report.benchmarks {
            println!(
                "  {:<72} k={:<4} recall={:.4} (min {:.4}, n={})",
                bench.benchmark_id.to_string(),
                bench.k,
                bench.recall.mean,
                bench.recall.min,
                bench.recall.count
            );
        }
        if let Some(mean) = report.mean_recall() {
            println!("  mean recall: {:.4}", mean);
        }
    }
    Ok(())
}

fn print_report_header(source: &Path) {
    println!();
    println!("{}", source.display());
}

// ============================================================================
// Id
// ============================================================================

#[derive(Parser, Debug)]
pub struct IdArgs {
    /// Identifier such as qdrant/query_throughput/16:100_4.00:8.00-20:20:p:F-5:10
    pub id: String,

    /// Also show the backend point id of this reference vector index
    #[arg(long)]
    pub point: Option<u64>,
}

pub fn id(args: IdArgs) -> Result<()> {
    let id = BenchmarkId::parse(&args.id)?;
    println!("provider:          {}", id.provider);
    println!("group:             {}", id.bench_group);
    println!("m:                 {}", id.ingestion.m);
    println!("ef_construction:   {}", id.ingestion.ef_construction);
    println!("cpus:              {}", id.limits.cpus);
    println!("memory_gb:         {}", id.limits.memory_gb);
    println!("k:                 {}", id.query.k);
    println!("ef:                {}", id.query.ef);
    println!("fetch_payload:     {}", id.query.fetch_payload);
    println!("use_filters:       {}", id.query.use_filters);
    println!("tasks:             {}", id.parallelism.num_tasks);
    println!("queries_per_task:  {}", id.parallelism.queries_per_task);
    println!("total_queries:     {}", id.parallelism.total_queries());
    if let Some(index) = args.point {
        println!("point {}:         {}", index, index_to_fake_uuid(index));
    }
    Ok(())
}
