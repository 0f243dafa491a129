//! Provider abstraction layer.
//!
//! One trait, [`VectorDatabase`], implemented once per backend. Each
//! implementation owns the translation of a [`QueryFilter`] into its native
//! filter language; callers only ever see:
//!
//! - `upsert(vector_id, vector, payload)`
//! - `search(request) -> hits ordered by increasing distance, at most k`
//!
//! Scores are normalized to euclidean distances by each backend so results of
//! different providers compare directly.
//!
//! `ef` is handed to the backend's closest knob without renormalization:
//! `hnsw_ef` for Qdrant, `num_candidates` for Elasticsearch and
//! `exploreAdditionalHits = ef - k` for Vespa. These are not equivalent, small
//! recall differences between providers are expected from it.

mod elasticsearch;
mod exact;
mod http;
mod qdrant;
mod vespa;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::unknown_provider;
use crate::generate::{DocumentPayload, QueryFilter};
use crate::identifier::IngestionParameters;
use crate::ids::{index_to_fake_uuid, parse_fake_uuid};

pub use elasticsearch::Elasticsearch;
pub use exact::ExactSearch;
pub use qdrant::Qdrant;
pub use vespa::Vespa;

/// Name of the collection / index / document type on every backend.
pub const COLLECTION: &str = "content";

/// Vectors per upsert request during ingestion.
pub const INGEST_BATCH_SIZE: usize = 100;

// ============================================================================
// Request / response types
// ============================================================================

/// A vector with its payload, as sent to a backend.
#[derive(Debug, Clone, Copy)]
pub struct Point<'a> {
    pub id: u64,
    pub vector: &'a [f32],
    pub payload: &'a DocumentPayload,
}

/// One k-NN query.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub vector: &'a [f32],
    /// `None` searches without any filter
    pub filter: Option<&'a QueryFilter>,
    pub k: usize,
    /// `ef` / `num_candidates`, passed through raw
    pub ef: usize,
    pub fetch_payload: bool,
}

/// One search result, `distance` is euclidean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<DocumentPayload>,
}

/// Order hits by increasing distance (ties by id) and keep at most `k`.
pub fn normalize_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    hits.truncate(k);
    hits
}

// ============================================================================
// VectorDatabase
// ============================================================================

/// Capability every benchmarked backend provides.
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Short lowercase name, used as the provider part of benchmark ids.
    fn name(&self) -> &'static str;

    /// Create the collection with the given HNSW parameters if it is missing.
    ///
    /// Returns `true` when the collection was created and needs ingestion.
    async fn initialize(&self, params: &IngestionParameters, dim: usize) -> Result<bool>;

    /// Hook before mass ingestion, e.g. to pause index building.
    async fn prepare_ingestion(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()>;

    async fn upsert(&self, vector_id: u64, vector: &[f32], payload: &DocumentPayload) -> Result<()> {
        self.upsert_batch(&[Point {
            id: vector_id,
            vector,
            payload,
        }])
        .await
    }

    /// Wait until everything ingested is indexed and searchable.
    async fn finish_ingestion(&self, _max_wait: Duration) -> Result<()> {
        Ok(())
    }

    /// k-NN search; hits come back ordered by increasing distance, at most `k`.
    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>>;
}

// ============================================================================
// Provider selection
// ============================================================================

/// Backends known to the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Qdrant,
    Elasticsearch,
    Vespa,
    /// In-process brute-force oracle
    Exact,
}

impl ProviderKind {
    pub const REMOTE: [ProviderKind; 3] = [
        ProviderKind::Qdrant,
        ProviderKind::Elasticsearch,
        ProviderKind::Vespa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Qdrant => "qdrant",
            ProviderKind::Elasticsearch => "elasticsearch",
            ProviderKind::Vespa => "vespa",
            ProviderKind::Exact => "exact",
        }
    }

    /// Connect to the backend at its configured endpoint.
    pub fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn VectorDatabase>> {
        let db: Arc<dyn VectorDatabase> = match self {
            ProviderKind::Qdrant => Arc::new(
                Qdrant::new(&config.qdrant_url).context("Failed to set up qdrant client")?,
            ),
            ProviderKind::Elasticsearch => Arc::new(
                Elasticsearch::new(&config.elasticsearch_url)
                    .context("Failed to set up elasticsearch client")?,
            ),
            ProviderKind::Vespa => Arc::new(
                Vespa::new(&config.vespa_url).context("Failed to set up vespa client")?,
            ),
            ProviderKind::Exact => Arc::new(ExactSearch::new()),
        };
        Ok(db)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qdrant" => Ok(ProviderKind::Qdrant),
            "elasticsearch" | "elastic" => Ok(ProviderKind::Elasticsearch),
            "vespa" => Ok(ProviderKind::Vespa),
            "exact" => Ok(ProviderKind::Exact),
            other => Err(unknown_provider(other)),
        }
    }
}

// ============================================================================
// Stored payload
// ============================================================================

/// Payload as stored in the backends: labels become UUID keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredPayload {
    pub publication_date: i64,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub link: String,
}

impl StoredPayload {
    pub fn from_document(payload: &DocumentPayload) -> Self {
        Self {
            publication_date: payload.publication_date,
            authors: label_uuids(payload.authors.iter()),
            tags: label_uuids(payload.tags.iter()),
            link: payload.link.clone(),
        }
    }

    pub fn into_document(self) -> Result<DocumentPayload> {
        Ok(DocumentPayload {
            publication_date: self.publication_date,
            authors: parse_labels("authors", &self.authors)?,
            tags: parse_labels("tags", &self.tags)?,
            link: self.link,
        })
    }
}

/// UUID keywords of a label set, in label order.
pub(crate) fn label_uuids<'a>(labels: impl IntoIterator<Item = &'a u32>) -> Vec<String> {
    labels
        .into_iter()
        .map(|label| index_to_fake_uuid(*label as u64).to_string())
        .collect()
}

fn parse_labels(field: &str, values: &[String]) -> Result<std::collections::BTreeSet<u32>> {
    values
        .iter()
        .map(|value| {
            parse_fake_uuid(value)
                .and_then(|index| u32::try_from(index).ok())
                .with_context(|| format!("Unknown {} label in stored payload: {}", field, value))
        })
        .collect()
}

/// Point id as stored in the backends.
pub(crate) fn point_uuid(id: u64) -> String {
    index_to_fake_uuid(id).to_string()
}

/// Recover a point id from its stored UUID.
pub(crate) fn parse_point_id(value: &str) -> Result<u64> {
    parse_fake_uuid(value).with_context(|| format!("Backend returned a foreign point id: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: u64, distance: f32) -> SearchHit {
        SearchHit {
            id,
            distance,
            payload: None,
        }
    }

    #[test]
    fn test_normalize_hits_orders_and_truncates() {
        let hits = vec![hit(3, 0.5), hit(1, 0.1), hit(2, 0.5), hit(4, 0.9)];
        let ids: Vec<u64> = normalize_hits(hits, 3).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_stored_payload_round_trip() {
        let payload = DocumentPayload {
            publication_date: 1_000,
            authors: [1, 5].into_iter().collect(),
            tags: [199].into_iter().collect(),
            link: "abc".to_string(),
        };
        let stored = StoredPayload::from_document(&payload);
        assert_eq!(stored.authors[0], "00000000-0000-4001-8000-000000000001");
        assert_eq!(stored.into_document().unwrap(), payload);
    }

    #[test]
    fn test_foreign_ids_rejected() {
        assert!(parse_point_id("67e55044-10b1-426f-9247-bb680e5fe0c8").is_err());
        assert_eq!(parse_point_id(&point_uuid(77)).unwrap(), 77);
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("qdrant".parse::<ProviderKind>().unwrap(), ProviderKind::Qdrant);
        assert_eq!(ProviderKind::Elasticsearch.to_string(), "elasticsearch");
        assert!("milvus".parse::<ProviderKind>().is_err());
    }
}
