//! Query sampling.
//!
//! A [`QueryPlan`] fixes which query samples every worker issues, in which
//! order. It depends only on the run seed, the number of available samples
//! and the parallelism, so replaying the same plan against different
//! providers sends them identical vectors and filters.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::generate::{QueryFilter, QuerySample};
use crate::identifier::{Parallelism, QueryParameters};

/// One query as issued to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Index of the sample in the augmented dataset
    pub query_index: u64,
    pub query_vector_id: u64,
    /// `None` for unfiltered runs and for samples without a filter
    pub filter: Option<QueryFilter>,
    pub k: u32,
    pub ef: u32,
    pub fetch_payload: bool,
}

impl QueryRecord {
    /// Combine a pre-sampled query with the knobs of a run.
    pub fn materialize(query_index: u64, sample: &QuerySample, params: &QueryParameters) -> Self {
        Self {
            query_index,
            query_vector_id: sample.query_vector_id,
            filter: if params.use_filters {
                sample.filter.clone()
            } else {
                None
            },
            k: params.k,
            ef: params.ef,
            fetch_payload: params.fetch_payload,
        }
    }
}

/// Per-worker sample indices, drawn uniformly with replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub seed: u64,
    workers: Vec<Vec<u64>>,
}

impl QueryPlan {
    pub fn new(seed: u64, num_samples: usize, parallelism: &Parallelism) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let workers = (0..parallelism.num_tasks)
            .map(|_| {
                if num_samples == 0 {
                    return Vec::new();
                }
                (0..parallelism.queries_per_task)
                    .map(|_| rng.gen_range(0..num_samples as u64))
                    .collect()
            })
            .collect();
        Self { seed, workers }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Sample indices of `worker`, in issuance order.
    pub fn worker(&self, worker: usize) -> &[u64] {
        self.workers.get(worker).map_or(&[], Vec::as_slice)
    }

    pub fn total_queries(&self) -> usize {
        self.workers.iter().map(Vec::len).sum()
    }

    /// Query records of `worker` for a run with `params`.
    pub fn records<'a>(
        &'a self,
        worker: usize,
        samples: &'a [QuerySample],
        params: &'a QueryParameters,
    ) -> impl Iterator<Item = QueryRecord> + 'a {
        self.worker(worker).iter().filter_map(move |&index| {
            samples
                .get(index as usize)
                .map(|sample| QueryRecord::materialize(index, sample, params))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::LabelFilter;

    fn parallelism(num_tasks: u32, queries_per_task: u32) -> Parallelism {
        Parallelism {
            num_tasks,
            queries_per_task,
        }
    }

    fn samples() -> Vec<QuerySample> {
        let filter = QueryFilter {
            tags: LabelFilter {
                must_include: [3].into_iter().collect(),
                must_exclude: Default::default(),
            },
            ..Default::default()
        };
        vec![
            QuerySample {
                query_vector_id: 0,
                filter: Some(filter),
            },
            QuerySample {
                query_vector_id: 1,
                filter: None,
            },
        ]
    }

    #[test]
    fn test_plan_is_seeded() {
        let a = QueryPlan::new(7, 1000, &parallelism(5, 10));
        let b = QueryPlan::new(7, 1000, &parallelism(5, 10));
        let c = QueryPlan::new(8, 1000, &parallelism(5, 10));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.num_workers(), 5);
        assert_eq!(a.total_queries(), 50);
        assert!((0..5).all(|w| a.worker(w).iter().all(|&i| i < 1000)));
        assert!(a.worker(5).is_empty());
    }

    #[test]
    fn test_empty_sample_set() {
        let plan = QueryPlan::new(1, 0, &parallelism(3, 4));
        assert_eq!(plan.total_queries(), 0);
    }

    #[test]
    fn test_records_honor_use_filters() {
        let samples = samples();
        let plan = QueryPlan::new(3, samples.len(), &parallelism(1, 20));
        let mut params = QueryParameters {
            k: 10,
            ef: 40,
            fetch_payload: true,
            use_filters: true,
        };

        let filtered: Vec<QueryRecord> = plan.records(0, &samples, &params).collect();
        assert_eq!(filtered.len(), 20);
        for record in &filtered {
            assert_eq!(record.filter.is_some(), record.query_vector_id == 0);
            assert_eq!((record.k, record.ef), (10, 40));
        }

        params.use_filters = false;
        assert!(plan
            .records(0, &samples, &params)
            .all(|record| record.filter.is_none()));
    }
}
