//! Metrics computation for benchmark runs.
//!
//! Latency percentiles, post-hoc throughput, Recall@k/precision of a single
//! result list and Welford online statistics for aggregation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Latency statistics from a benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Average latency in milliseconds
    pub avg_ms: f64,
    /// Median (p50) latency in milliseconds
    pub p50_ms: f64,
    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,
    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,
    /// Minimum latency in milliseconds
    pub min_ms: f64,
    /// Maximum latency in milliseconds
    pub max_ms: f64,
    /// Number of measurements
    pub count: usize,
}

impl LatencyStats {
    /// Compute latency statistics from a slice of latency measurements (in milliseconds).
    pub fn from_latencies(latencies: &[f64]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = sorted.iter().sum();

        Self {
            avg_ms: sum / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            count: sorted.len(),
        }
    }

    /// Format as a summary string.
    pub fn summary(&self) -> String {
        format!(
            "avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
            self.avg_ms, self.p50_ms, self.p95_ms, self.p99_ms, self.max_ms
        )
    }
}

/// Compute percentile from sorted values.
///
/// # Arguments
///
/// * `sorted_values` - Values sorted in ascending order
/// * `p` - Percentile (0-100)
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

/// Compute throughput in queries per second.
pub fn compute_qps(total_queries: usize, total_time_ms: f64) -> f64 {
    if total_time_ms <= 0.0 {
        return 0.0;
    }
    1000.0 * total_queries as f64 / total_time_ms
}

/// Recall and precision of one result list against its ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallScore {
    /// |returned ∩ truth| / |truth|, where truth holds at most k ids
    pub recall: f64,
    /// |returned ∩ truth| / |returned|
    pub precision: f64,
    pub true_positives: usize,
}

/// Compute Recall@k and precision of `returned` against the true top-`k`.
///
/// Only the first `k` returned ids count. Recall is relative to the neighbours
/// that exist: a reference set smaller than `k` still allows a perfect 1.0.
/// When no neighbour is expected (`k == 0` or an empty truth set) the query
/// scores a trivially perfect 1.0.
pub fn compute_recall(returned: &[u64], truth: &[u64], k: usize) -> RecallScore {
    let relevant: HashSet<u64> = truth.iter().take(k).copied().collect();
    if k == 0 || relevant.is_empty() {
        return RecallScore {
            recall: 1.0,
            precision: 1.0,
            true_positives: 0,
        };
    }

    let retrieved: HashSet<u64> = returned.iter().take(k).copied().collect();
    let true_positives = retrieved.intersection(&relevant).count();

    RecallScore {
        recall: true_positives as f64 / relevant.len() as f64,
        precision: if retrieved.is_empty() {
            0.0
        } else {
            true_positives as f64 / retrieved.len() as f64
        },
        true_positives,
    }
}

/// Welford's online mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }

    /// Unbiased sample variance.
    pub fn sample_variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

impl Extend<f64> for Welford {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.update(value);
        }
    }
}

/// Summary of a sample distribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

impl DistributionSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut welford = Welford::new();
        welford.extend(values.iter().copied());

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Self {
            count: sorted.len(),
            mean: welford.mean().unwrap_or_default(),
            std_dev: welford.std_dev().unwrap_or_default(),
            min: sorted[0],
            p5: percentile(&sorted, 5.0),
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            max: sorted[sorted.len() - 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 50.0), 3.0);
        assert_eq!(percentile(&sorted, 100.0), 5.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_latencies(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(stats.count, 4);
        assert!((stats.avg_ms - 2.5).abs() < 1e-9);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 4.0);
        assert_eq!(LatencyStats::from_latencies(&[]), LatencyStats::default());
    }

    #[test]
    fn test_compute_qps() {
        assert!((compute_qps(50, 2000.0) - 25.0).abs() < 1e-9);
        assert_eq!(compute_qps(10, 0.0), 0.0);
    }

    #[test]
    fn test_recall_two_of_three() {
        let score = compute_recall(&[4, 2, 9], &[4, 7, 2], 3);
        assert!((score.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((score.precision - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(score.true_positives, 2);
    }

    #[test]
    fn test_recall_counts_only_first_k() {
        let score = compute_recall(&[9, 8, 1, 2], &[1, 2], 2);
        assert_eq!(score.recall, 0.0);
    }

    #[test]
    fn test_recall_short_result_list() {
        let score = compute_recall(&[1], &[1, 2, 3, 4], 4);
        assert!((score.recall - 0.25).abs() < 1e-9);
        assert_eq!(score.precision, 1.0);
    }

    #[test]
    fn test_recall_k_larger_than_reference_set() {
        // only three neighbours exist for k = 10
        let score = compute_recall(&[0, 1, 2], &[0, 1, 2], 10);
        assert_eq!(score.recall, 1.0);
        assert_eq!(score.true_positives, 3);

        let score = compute_recall(&[0, 5], &[0, 1, 2], 10);
        assert!((score.recall - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recall_nothing_expected_is_perfect() {
        let score = compute_recall(&[], &[], 10);
        assert_eq!(score.recall, 1.0);
        assert_eq!(score.precision, 1.0);
    }

    #[test]
    fn test_welford() {
        let mut w = Welford::new();
        assert_eq!(w.mean(), None);
        w.extend([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(w.count(), 8);
        assert!((w.mean().unwrap() - 5.0).abs() < 1e-12);
        assert!((w.variance().unwrap() - 4.0).abs() < 1e-12);
        assert!((w.sample_variance().unwrap() - 32.0 / 7.0).abs() < 1e-12);
        assert!((w.std_dev().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_distribution_summary() {
        let values: Vec<f64> = (0..=100).map(|v| v as f64 / 100.0).collect();
        let summary = DistributionSummary::from_values(&values);
        assert_eq!(summary.count, 101);
        assert!((summary.mean - 0.5).abs() < 1e-9);
        assert_eq!(summary.p50, 0.5);
        assert_eq!(summary.p5, 0.05);
        assert_eq!(summary.max, 1.0);
    }
}
