//! Brute-force exact nearest neighbours.
//!
//! Ranking uses the same metric the backends index with (euclidean). Ties are
//! broken by id so the result is fully deterministic.
//!
//! # Parallelism
//!
//! [`top_k_parallel`] splits the reference set into chunks, keeps a bounded
//! heap per chunk on the rayon pool and merges the partial results. For GIST
//! (1M x 960) a single query is ~1G multiply-adds, so chunking pays off even
//! for one query at a time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vdbench_core::distance::Metric;

/// Reference vectors per rayon work item.
const CHUNK_SIZE: usize = 4096;

/// One exact neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
}

/// Heap entry ordered by (rank key, id).
#[derive(Debug, Clone, Copy)]
struct Candidate {
    key: f32,
    id: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.total_cmp(&other.key).then(self.id.cmp(&other.id))
    }
}

/// Bounded max-heap keeping the `k` smallest candidates.
struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for candidate in other.heap {
            self.push(candidate);
        }
        self
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Turn rank keys back into metric distances.
fn finish(top: TopK, metric: Metric) -> Vec<Neighbor> {
    top.into_sorted()
        .into_iter()
        .map(|c| Neighbor {
            id: c.id,
            distance: match metric {
                Metric::Euclidean => c.key.sqrt(),
                _ => c.key,
            },
        })
        .collect()
}

/// Exact top-`k` among arbitrary `(id, vector)` candidates.
pub fn top_k<'a, I>(query: &[f32], k: usize, metric: Metric, candidates: I) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (u64, &'a [f32])>,
{
    let mut top = TopK::new(k);
    for (id, vector) in candidates {
        top.push(Candidate {
            key: metric.rank_key(query, vector),
            id,
        });
    }
    finish(top, metric)
}

/// Exact top-`k` over a dense reference set where id = position.
pub fn top_k_parallel(reference: &[Vec<f32>], query: &[f32], k: usize, metric: Metric) -> Vec<Neighbor> {
    let top = reference
        .par_chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(chunk, vectors)| {
            let mut top = TopK::new(k);
            let base = chunk * CHUNK_SIZE;
            for (offset, vector) in vectors.iter().enumerate() {
                top.push(Candidate {
                    key: metric.rank_key(query, vector),
                    id: (base + offset) as u64,
                });
            }
            top
        })
        .reduce(|| TopK::new(k), TopK::merge);
    finish(top, metric)
}
