//! Offline Recall@k / precision evaluation.
//!
//! Scans a report tree for result logs, recomputes the exact top-k of every
//! unfiltered successful query by brute force and scores the logged ids
//! against it. Filtered queries are counted but left unscored.
//!
//! Every log produces a `recall.json` next to it; the same reports are
//! returned to the caller.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vdbench_core::distance::Metric;
use walkdir::WalkDir;

use crate::driver::{QueryOutcome, ResultLogEntry, RESULT_LOG_FILE};
use crate::ground_truth::top_k_parallel;
use crate::identifier::BenchmarkId;
use crate::metrics::{compute_recall, DistributionSummary};

/// Name of the summary written next to each result log.
pub const RECALL_REPORT_FILE: &str = "recall.json";

/// Scores of one benchmark id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecall {
    pub benchmark_id: BenchmarkId,
    pub k: u32,
    pub recall: DistributionSummary,
    pub precision: DistributionSummary,
}

/// Evaluation of one result log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallReport {
    pub source: PathBuf,
    /// Entries scored
    pub evaluated: usize,
    pub skipped_filtered: usize,
    pub skipped_failed: usize,
    /// Entries whose ids do not exist in the reference or query set
    pub integrity_errors: usize,
    /// Lines that did not parse, e.g. cut off by an interrupted run
    pub malformed_lines: usize,
    pub benchmarks: Vec<BenchmarkRecall>,
}

impl RecallReport {
    /// Mean recall over every scored entry.
    pub fn mean_recall(&self) -> Option<f64> {
        let total: usize = self.benchmarks.iter().map(|b| b.recall.count).sum();
        if total == 0 {
            return None;
        }
        let sum: f64 = self
            .benchmarks
            .iter()
            .map(|b| b.recall.mean * b.recall.count as f64)
            .sum();
        Some(sum / total as f64)
    }
}

struct Scores {
    benchmark_id: BenchmarkId,
    k: u32,
    recall: Vec<f64>,
    precision: Vec<f64>,
}

/// Brute-force scorer over one reference / query vector set.
pub struct Evaluator<'a> {
    reference: &'a [Vec<f32>],
    queries: &'a [Vec<f32>],
    metric: Metric,
    ground_truth: HashMap<(u64, u32), Vec<u64>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(reference: &'a [Vec<f32>], queries: &'a [Vec<f32>], metric: Metric) -> Self {
        Self {
            reference,
            queries,
            metric,
            ground_truth: HashMap::new(),
        }
    }

    /// Exact top-`k` ids of a query vector, cached per `(query, k)`.
    pub fn ground_truth(&mut self, query_vector_id: u64, k: u32) -> Option<&[u64]> {
        let (reference, queries, metric) = (self.reference, self.queries, self.metric);
        let query = queries.get(query_vector_id as usize)?;
        let ids = self
            .ground_truth
            .entry((query_vector_id, k))
            .or_insert_with(|| {
                top_k_parallel(reference, query, k as usize, metric)
                    .into_iter()
                    .map(|n| n.id)
                    .collect()
            });
        Some(ids.as_slice())
    }

    /// Evaluate every `recall_data.jsonl` below `root`, writing `recall.json` beside each.
    pub fn evaluate_tree(&mut self, root: &Path) -> Result<Vec<RecallReport>> {
        let logs = find_result_logs(root)?;

        let mut reports = Vec::new();
        for log in logs {
            let report = self.evaluate_log(&log)?;
            write_report(&report)?;
            reports.push(report);
        }
        if reports.is_empty() {
            tracing::warn!(root = %root.display(), "No result logs found");
        }
        Ok(reports)
    }

    /// Score the unfiltered successful entries of one result log.
    #[tracing::instrument(skip(self))]
    pub fn evaluate_log(&mut self, path: &Path) -> Result<RecallReport> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut report = RecallReport {
            source: path.to_path_buf(),
            ..Default::default()
        };
        // keyed by rendered id so reports list benchmarks in a stable order
        let mut scores: BTreeMap<String, Scores> = BTreeMap::new();

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ResultLogEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "Skipping malformed result entry");
                    report.malformed_lines += 1;
                    continue;
                }
            };
            if entry.filtered {
                report.skipped_filtered += 1;
                continue;
            }
            let returned_ids = match &entry.outcome {
                QueryOutcome::Success { returned_ids, .. } => returned_ids,
                QueryOutcome::Failed { .. } => {
                    report.skipped_failed += 1;
                    continue;
                }
            };

            if let Some(bad) = returned_ids
                .iter()
                .find(|&&id| id as usize >= self.reference.len())
            {
                tracing::warn!(
                    line = number + 1,
                    id = bad,
                    reference = self.reference.len(),
                    "Returned id is not in the reference set, excluding entry"
                );
                report.integrity_errors += 1;
                continue;
            }
            let truth = match self.ground_truth(entry.query_vector_id, entry.k) {
                Some(truth) => truth,
                None => {
                    tracing::warn!(
                        line = number + 1,
                        query_vector_id = entry.query_vector_id,
                        "Query vector is not in the query set, excluding entry"
                    );
                    report.integrity_errors += 1;
                    continue;
                }
            };

            let score = compute_recall(returned_ids, truth, entry.k as usize);
            let slot = scores
                .entry(entry.benchmark_id.to_string())
                .or_insert_with(|| Scores {
                    benchmark_id: entry.benchmark_id.clone(),
                    k: entry.k,
                    recall: Vec::new(),
                    precision: Vec::new(),
                });
            slot.recall.push(score.recall);
            slot.precision.push(score.precision);
            report.evaluated += 1;
        }

        report.benchmarks = scores
            .into_values()
            .map(|scores| BenchmarkRecall {
                benchmark_id: scores.benchmark_id,
                k: scores.k,
                recall: DistributionSummary::from_values(&scores.recall),
                precision: DistributionSummary::from_values(&scores.precision),
            })
            .collect();

        tracing::info!(
            evaluated = report.evaluated,
            filtered = report.skipped_filtered,
            failed = report.skipped_failed,
            integrity_errors = report.integrity_errors,
            "Evaluated result log"
        );
        Ok(report)
    }
}

/// Collect every result log below `root` in file-name order.
fn find_result_logs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut logs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == RESULT_LOG_FILE {
            logs.push(entry.into_path());
        }
    }
    Ok(logs)
}

/// Location of the summary for a result log.
pub fn report_path(log: &Path) -> PathBuf {
    log.with_file_name(RECALL_REPORT_FILE)
}

fn write_report(report: &RecallReport) -> Result<()> {
    let path = report_path(&report.source);
    let json = serde_json::to_string_pretty(report).context("Failed to serialize recall report")?;
    fs::write(&path, json + "\n").with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::DocumentPayload;
    use crate::ingest::{ingest, IngestConfig};
    use crate::provider::{ExactSearch, SearchRequest, VectorDatabase};
    use std::io::Write;
    use tempfile::TempDir;

    const ID: &str = "exact/unit/16:100_4.00:8.00-3:3:p:f-1:1";

    fn line(query_vector_id: u64, filtered: bool, outcome: serde_json::Value) -> String {
        let mut entry = serde_json::json!({
            "benchmark_id": ID,
            "worker": 0,
            "sequence": 0,
            "query_index": query_vector_id,
            "query_vector_id": query_vector_id,
            "filtered": filtered,
            "k": 3,
            "latency_ms": 1.0,
            "finished_at_ms": 0,
        });
        for (key, value) in outcome.as_object().unwrap() {
            entry[key] = value.clone();
        }
        entry.to_string()
    }

    fn success(ids: &[u64]) -> serde_json::Value {
        serde_json::json!({ "status": "success", "returned_ids": ids, "payload_present": false })
    }

    /// True top-3 of query 0 (at 0.0) is 4, 7, 2.
    fn reference() -> Vec<Vec<f32>> {
        let positions = [5.0, 6.0, 0.3, 7.0, 0.1, 8.0, 9.0, 0.2, 10.0, 11.0];
        positions.iter().map(|p| vec![*p]).collect()
    }

    fn write_log(dir: &Path, lines: &[String]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(RESULT_LOG_FILE);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_two_of_three() {
        let dir = TempDir::new().unwrap();
        let path = write_log(dir.path(), &[line(0, false, success(&[4, 2, 9]))]);
        let (reference, queries) = (reference(), vec![vec![0.0]]);
        let mut evaluator = Evaluator::new(&reference, &queries, Metric::Euclidean);

        assert_eq!(evaluator.ground_truth(0, 3).unwrap(), &[4, 7, 2]);
        let report = evaluator.evaluate_log(&path).unwrap();
        assert_eq!(report.evaluated, 1);
        assert!((report.benchmarks[0].recall.mean - 2.0 / 3.0).abs() < 1e-9);
        assert!((report.mean_recall().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_filtered_failed_and_broken_entries_excluded() {
        let dir = TempDir::new().unwrap();
        let lines = vec![
            line(0, false, success(&[4, 7, 2])),
            line(0, true, success(&[9, 8, 5])),
            line(0, false, serde_json::json!({ "status": "failed", "error": "timeout" })),
            line(0, false, success(&[4, 7, 999])),
            line(5, false, success(&[4, 7, 2])),
            "{\"benchmark_id\": \"exact/un".to_string(),
        ];
        let path = write_log(dir.path(), &lines);
        let (reference, queries) = (reference(), vec![vec![0.0]]);
        let report = Evaluator::new(&reference, &queries, Metric::Euclidean)
            .evaluate_log(&path)
            .unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.skipped_filtered, 1);
        assert_eq!(report.skipped_failed, 1);
        assert_eq!(report.integrity_errors, 2);
        assert_eq!(report.malformed_lines, 1);
        assert_eq!(report.benchmarks[0].recall.mean, 1.0);
    }

    #[test]
    fn test_tree_writes_sibling_reports() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("reports");
        write_log(&root.join("a"), &[line(0, false, success(&[4, 7, 2]))]);
        write_log(&root.join("b").join("nested"), &[line(0, false, success(&[9, 8, 5]))]);
        fs::write(root.join("a").join("other.jsonl"), "not a log\n").unwrap();

        let (reference, queries) = (reference(), vec![vec![0.0]]);
        let reports = Evaluator::new(&reference, &queries, Metric::Euclidean)
            .evaluate_tree(&root)
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].mean_recall(), Some(1.0));
        assert_eq!(reports[1].mean_recall(), Some(0.0));
        let written: RecallReport = serde_json::from_str(
            &fs::read_to_string(root.join("b").join("nested").join(RECALL_REPORT_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(written, reports[1]);
    }

    #[tokio::test]
    async fn test_exact_backend_is_perfect_when_k_exceeds_reference() {
        let reference: Vec<Vec<f32>> = vec![vec![1.0], vec![2.0], vec![3.0]];
        let payloads: Vec<DocumentPayload> = (0..3)
            .map(|i| DocumentPayload {
                publication_date: i,
                authors: Default::default(),
                tags: Default::default(),
                link: String::new(),
            })
            .collect();
        let db = ExactSearch::new();
        ingest(&db, &reference, &payloads, &IngestConfig::default())
            .await
            .unwrap();

        let hits = db
            .search(&SearchRequest {
                vector: &[0.0],
                filter: None,
                k: 10,
                ef: 10,
                fetch_payload: false,
            })
            .await
            .unwrap();
        let returned: Vec<u64> = hits.iter().map(|hit| hit.id).collect();
        assert_eq!(returned, vec![0, 1, 2]);

        let queries = vec![vec![0.0]];
        let mut evaluator = Evaluator::new(&reference, &queries, Metric::Euclidean);
        assert_eq!(evaluator.ground_truth(0, 10).unwrap(), &[0, 1, 2]);

        let mut outcome = success(&returned);
        outcome["k"] = serde_json::json!(10);
        let dir = TempDir::new().unwrap();
        let path = write_log(dir.path(), &[line(0, false, outcome)]);
        let report = evaluator.evaluate_log(&path).unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.benchmarks[0].k, 10);
        assert_eq!(report.benchmarks[0].recall.mean, 1.0);
    }
}
