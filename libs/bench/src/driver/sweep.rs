//! The `query_throughput` benchmark group.

use crate::identifier::{
    BenchmarkId, IngestionParameters, Parallelism, QueryParameters, ResourceLimits,
};

pub const QUERY_THROUGHPUT_GROUP: &str = "query_throughput";

/// k values swept without payload fetch; ef follows k.
pub const SWEEP_K: [u32; 4] = [20, 50, 80, 100];

/// k of the extra configuration that fetches payloads.
pub const SWEEP_FETCH_K: u32 = 100;

pub const DEFAULT_NUM_TASKS: u32 = 5;
pub const DEFAULT_QUERIES_PER_TASK: u32 = 10;

/// Query parameters of the group, each once without and once with filters.
pub fn query_throughput_parameters() -> Vec<QueryParameters> {
    let unfetched = SWEEP_K.iter().map(|&k| (k, false));
    let fetched = std::iter::once((SWEEP_FETCH_K, true));
    unfetched
        .chain(fetched)
        .flat_map(|(k, fetch_payload)| {
            [false, true].map(|use_filters| QueryParameters {
                k,
                ef: k,
                fetch_payload,
                use_filters,
            })
        })
        .collect()
}

/// Identifiers of every run of the group for one provider.
pub fn query_throughput_ids(
    provider: &str,
    ingestion: IngestionParameters,
    limits: ResourceLimits,
    parallelism: Parallelism,
) -> Vec<BenchmarkId> {
    query_throughput_parameters()
        .into_iter()
        .map(|query| BenchmarkId {
            provider: provider.to_string(),
            bench_group: QUERY_THROUGHPUT_GROUP.to_string(),
            ingestion,
            limits,
            query,
            parallelism,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_shape() {
        let params = query_throughput_parameters();
        assert_eq!(params.len(), 10);
        assert!(params.iter().all(|p| p.ef == p.k));
        assert_eq!(params.iter().filter(|p| p.use_filters).count(), 5);
        assert_eq!(params.iter().filter(|p| p.fetch_payload).count(), 2);
    }

    #[test]
    fn test_sweep_ids_render() {
        let ids = query_throughput_ids(
            "elasticsearch",
            IngestionParameters::default(),
            ResourceLimits::default(),
            Parallelism {
                num_tasks: DEFAULT_NUM_TASKS,
                queries_per_task: DEFAULT_QUERIES_PER_TASK,
            },
        );
        let rendered: Vec<String> = ids.iter().map(|id| id.render().unwrap()).collect();
        assert_eq!(
            rendered[0],
            "elasticsearch/query_throughput/16:100_4.00:8.00-20:20:p:f-5:10"
        );
        assert_eq!(
            rendered[9],
            "elasticsearch/query_throughput/16:100_4.00:8.00-100:100:P:F-5:10"
        );
        let unique: std::collections::HashSet<&String> = rendered.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
