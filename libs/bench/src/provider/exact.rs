//! In-process brute-force oracle.
//!
//! Implements the same filter semantics as the remote backends with exact
//! search, so an unfiltered query against it always scores Recall@k = 1.0.
//! Used by tests and for smoke runs of the driver without a cluster.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use vdbench_core::distance::Metric;

use crate::error::check_dimension;
use crate::generate::DocumentPayload;
use crate::ground_truth::top_k;
use crate::identifier::IngestionParameters;

use super::{Point, SearchHit, SearchRequest, VectorDatabase};

struct StoredPoint {
    vector: Vec<f32>,
    payload: DocumentPayload,
}

#[derive(Default)]
struct State {
    dim: Option<usize>,
    points: BTreeMap<u64, StoredPoint>,
}

/// Exact k-NN over everything upserted so far.
#[derive(Default)]
pub struct ExactSearch {
    state: RwLock<State>,
}

impl ExactSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.points.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("Exact search state lock poisoned")
}

#[async_trait]
impl VectorDatabase for ExactSearch {
    fn name(&self) -> &'static str {
        "exact"
    }

    async fn initialize(&self, _params: &IngestionParameters, dim: usize) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.dim = Some(dim);
        Ok(state.points.is_empty())
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        for point in points {
            match state.dim {
                Some(dim) => check_dimension(dim, point.vector)?,
                None => state.dim = Some(point.vector.len()),
            }
            state.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector.to_vec(),
                    payload: point.payload.clone(),
                },
            );
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let state = self.state.read().map_err(poisoned)?;
        if let Some(dim) = state.dim {
            check_dimension(dim, request.vector)?;
        }

        let candidates = state
            .points
            .iter()
            .filter(|(_, point)| request.filter.map_or(true, |f| f.matches(&point.payload)))
            .map(|(id, point)| (*id, point.vector.as_slice()));
        let neighbors = top_k(request.vector, request.k, Metric::Euclidean, candidates);

        Ok(neighbors
            .into_iter()
            .map(|n| SearchHit {
                id: n.id,
                distance: n.distance,
                payload: if request.fetch_payload {
                    state.points.get(&n.id).map(|p| p.payload.clone())
                } else {
                    None
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{LabelFilter, QueryFilter};

    fn payload(date: i64, tags: &[u32]) -> DocumentPayload {
        DocumentPayload {
            publication_date: date,
            authors: Default::default(),
            tags: tags.iter().copied().collect(),
            link: "x".to_string(),
        }
    }

    async fn populated() -> ExactSearch {
        let db = ExactSearch::new();
        db.initialize(&IngestionParameters::default(), 1).await.unwrap();
        for i in 0..10u64 {
            let tags: Vec<u32> = if i % 2 == 0 { vec![1] } else { vec![2] };
            db.upsert(i, &[i as f32], &payload(i as i64, &tags)).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_unfiltered_search_is_exact() {
        let db = populated().await;
        let hits = db
            .search(&SearchRequest {
                vector: &[4.1],
                filter: None,
                k: 3,
                ef: 3,
                fetch_payload: false,
            })
            .await
            .unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![4, 5, 3]);
        assert!(hits.iter().all(|h| h.payload.is_none()));
    }

    #[tokio::test]
    async fn test_filter_applies_before_top_k() {
        let db = populated().await;
        let filter = QueryFilter {
            tags: LabelFilter {
                must_include: [2].into_iter().collect(),
                must_exclude: Default::default(),
            },
            ..Default::default()
        };
        let hits = db
            .search(&SearchRequest {
                vector: &[4.1],
                filter: Some(&filter),
                k: 2,
                ef: 2,
                fetch_payload: true,
            })
            .await
            .unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![5, 3]);
        assert_eq!(hits[0].payload.as_ref().unwrap().publication_date, 5);
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let db = populated().await;
        assert!(db.upsert(99, &[1.0, 2.0], &payload(0, &[])).await.is_err());
        assert_eq!(db.len(), 10);
    }
}
