/// End-to-end pipeline against the in-process exact provider:
/// generate -> persist -> reload -> ingest -> query load -> evaluate.
///
/// The exact provider is a brute-force oracle, so every unfiltered query must
/// score Recall@k = 1.0 and filtered queries must be counted but not scored.
mod common;

use std::sync::Arc;

use common::{benchmark_id, query_params, write_dataset};
use tempfile::TempDir;
use vdbench::driver::{open_result_log, LogWriterConfig};
use vdbench::provider::ExactSearch;
use vdbench::{
    ingest, run_load, AugmentedDataset, Evaluator, GenerationSettings, IngestConfig, LoadConfig,
    ReportLayout, VectorDatabase, Workload,
};
use vdbench_core::distance::Metric;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exact_provider_scores_perfect_recall() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(&dir.path().join("data"), 500, 40);

    let augmented_dir = AugmentedDataset::default_dir(&dataset.base_source.path);
    AugmentedDataset::generate(&GenerationSettings::default(), &dataset)
        .unwrap()
        .write(&augmented_dir)
        .unwrap();
    let augmented = AugmentedDataset::load(&augmented_dir).unwrap();
    assert!(augmented.manifest.num_filtered_queries > 0);

    let db = Arc::new(ExactSearch::new());
    let summary = ingest(
        db.as_ref(),
        &dataset.base_vectors,
        &augmented.documents,
        &IngestConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(summary.vectors, 500);

    let layout = ReportLayout::new(dir.path().join("reports"));
    let log_path = layout.result_log(db.name());
    let workload = Arc::new(Workload::from_augmented(&dataset, &augmented).unwrap());

    let mut total_entries = 0;
    for use_filters in [false, true] {
        let (writer, consumer) = open_result_log(&log_path, &LogWriterConfig::default())
            .await
            .unwrap();
        let id = benchmark_id("exact", query_params(10, use_filters), 4, 15);
        let run = run_load(
            db.clone(),
            workload.clone(),
            &id,
            &LoadConfig::default(),
            &writer,
        )
        .await
        .unwrap();
        assert_eq!(run.failures, 0);
        assert_eq!(run.total_queries, 60);
        drop(writer);
        total_entries += consumer.await.unwrap().unwrap();
    }
    assert_eq!(total_entries, 120);

    let mut evaluator = Evaluator::new(&dataset.base_vectors, &dataset.query_vectors, Metric::Euclidean);
    let reports = evaluator.evaluate_tree(layout.root()).unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];

    assert!(report.skipped_filtered > 0);
    assert_eq!(report.evaluated + report.skipped_filtered, 120);
    assert_eq!(report.integrity_errors, 0);
    assert_eq!(report.mean_recall(), Some(1.0));
    for benchmark in &report.benchmarks {
        assert_eq!(benchmark.recall.min, 1.0);
        assert_eq!(benchmark.precision.mean, 1.0);
    }
    assert!(log_path.with_file_name("recall.json").exists());
}

#[tokio::test]
async fn test_filtered_results_satisfy_filters() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(dir.path(), 400, 30);
    let augmented = AugmentedDataset::generate(&GenerationSettings::default(), &dataset).unwrap();

    let db = ExactSearch::new();
    ingest(&db, &dataset.base_vectors, &augmented.documents, &IngestConfig::default())
        .await
        .unwrap();

    for sample in augmented.queries.iter().filter(|q| q.filter.is_some()) {
        let filter = sample.filter.as_ref().unwrap();
        let hits = db
            .search(&vdbench::SearchRequest {
                vector: &dataset.query_vectors[sample.query_vector_id as usize],
                filter: Some(filter),
                k: 10,
                ef: 10,
                fetch_payload: true,
            })
            .await
            .unwrap();
        let expected = augmented.documents.iter().filter(|d| filter.matches(d)).count();
        assert_eq!(hits.len(), expected.min(10));
        for hit in hits {
            assert!(filter.matches(hit.payload.as_ref().unwrap()));
        }
    }
}
