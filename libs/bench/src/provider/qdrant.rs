//! Qdrant over its REST API.
//!
//! Filter translation:
//! - each included label is its own `must` match condition (conjunction)
//! - excluded labels form one `must_not` `match.any` condition
//! - date bounds become a `range` with `gte`/`lte`

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::generate::{LabelFilter, QueryFilter};
use crate::identifier::IngestionParameters;

use super::http::{body_to_error, build_client, endpoint, parse_base_url, send_checked};
use super::{
    label_uuids, normalize_hits, parse_point_id, point_uuid, Point, SearchHit, SearchRequest,
    StoredPayload, VectorDatabase, COLLECTION,
};

/// Segment size at which Qdrant starts building HNSW graphs again after ingestion.
const INDEXING_THRESHOLD: u64 = 20_000;

pub struct Qdrant {
    client: Client,
    base_url: Url,
    collection: String,
}

impl Qdrant {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: parse_base_url(base_url)?,
            collection: COLLECTION.to_string(),
        })
    }

    fn url<'a>(&'a self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        endpoint(
            &self.base_url,
            ["collections", self.collection.as_str()]
                .into_iter()
                .chain(segments),
        )
    }

    async fn set_indexing_threshold(&self, threshold: u64) -> Result<()> {
        send_checked(self.client.patch(self.url([])).json(&json!({
            "optimizers_config": { "indexing_threshold": threshold }
        })))
        .await
        .context("Failed to update qdrant optimizer config")?;
        Ok(())
    }

    async fn collection_status(&self) -> Result<String> {
        let info: CollectionInfo = send_checked(self.client.get(self.url([])))
            .await?
            .json()
            .await
            .context("Malformed qdrant collection info")?;
        Ok(info.result.status)
    }
}

#[async_trait]
impl VectorDatabase for Qdrant {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn initialize(&self, params: &IngestionParameters, dim: usize) -> Result<bool> {
        let response = self
            .client
            .get(self.url([]))
            .send()
            .await
            .context("Failed to reach qdrant")?;
        match response.status() {
            StatusCode::OK => return Ok(false),
            StatusCode::NOT_FOUND => {}
            _ => return Err(body_to_error(response).await),
        }

        send_checked(self.client.put(self.url([])).json(&json!({
            "vectors": { "size": dim, "distance": "Euclid" },
            "hnsw_config": {
                "m": params.m,
                "ef_construct": params.ef_construction,
            },
        })))
        .await
        .context("Failed to create qdrant collection")?;

        for (field, schema) in [
            ("publication_date", "integer"),
            ("authors", "keyword"),
            ("tags", "keyword"),
        ] {
            send_checked(
                self.client
                    .put(self.url(["index"]))
                    .query(&[("wait", "true")])
                    .json(&json!({ "field_name": field, "field_schema": schema })),
            )
            .await
            .with_context(|| format!("Failed to create qdrant payload index on {}", field))?;
        }

        tracing::info!(collection = %self.collection, m = params.m, ef_construction = params.ef_construction, "Created qdrant collection");
        Ok(true)
    }

    async fn prepare_ingestion(&self) -> Result<()> {
        self.set_indexing_threshold(0).await
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()> {
        let points: Vec<Value> = points
            .iter()
            .map(|p| {
                json!({
                    "id": point_uuid(p.id),
                    "vector": p.vector,
                    "payload": StoredPayload::from_document(p.payload),
                })
            })
            .collect();
        send_checked(
            self.client
                .put(self.url(["points"]))
                .query(&[("wait", "true")])
                .json(&json!({ "points": points })),
        )
        .await
        .context("Qdrant upsert failed")?;
        Ok(())
    }

    async fn finish_ingestion(&self, max_wait: Duration) -> Result<()> {
        self.set_indexing_threshold(INDEXING_THRESHOLD).await?;
        let start = Instant::now();
        loop {
            let status = self.collection_status().await?;
            if status == "green" {
                return Ok(());
            }
            if start.elapsed() > max_wait {
                bail!("Qdrant collection still {} after {:?}", status, max_wait);
            }
            tracing::debug!(%status, "Waiting for qdrant indexing");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let body = search_body(request);
        let response: SearchResponse = send_checked(self.client.post(self.url(["points", "search"])).json(&body))
            .await?
            .json()
            .await
            .context("Malformed qdrant search response")?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                Ok(SearchHit {
                    id: parse_point_id(&point.id)?,
                    // euclid scores are distances already
                    distance: point.score,
                    payload: point.payload.map(StoredPayload::into_document).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(normalize_hits(hits, request.k))
    }
}

fn search_body(request: &SearchRequest<'_>) -> Value {
    let mut body = json!({
        "vector": request.vector,
        "limit": request.k,
        "params": { "hnsw_ef": request.ef, "exact": false },
        "with_payload": request.fetch_payload,
        "with_vector": false,
    });
    if let Some(filter) = request.filter.and_then(translate_filter) {
        body["filter"] = filter;
    }
    body
}

/// Qdrant filter for `filter`, `None` when it constrains nothing.
fn translate_filter(filter: &QueryFilter) -> Option<Value> {
    let mut must = Vec::new();
    let mut must_not = Vec::new();

    let date = &filter.publication_date;
    if !date.is_unconstrained() {
        let mut range = serde_json::Map::new();
        if let Some(gte) = date.gte {
            range.insert("gte".to_string(), gte.into());
        }
        if let Some(lte) = date.lte {
            range.insert("lte".to_string(), lte.into());
        }
        must.push(json!({ "key": "publication_date", "range": range }));
    }

    for (field, labels) in [("authors", &filter.authors), ("tags", &filter.tags)] {
        push_label_conditions(field, labels, &mut must, &mut must_not);
    }

    if must.is_empty() && must_not.is_empty() {
        return None;
    }
    let mut out = serde_json::Map::new();
    if !must.is_empty() {
        out.insert("must".to_string(), Value::Array(must));
    }
    if !must_not.is_empty() {
        out.insert("must_not".to_string(), Value::Array(must_not));
    }
    Some(Value::Object(out))
}

fn push_label_conditions(
    field: &str,
    labels: &LabelFilter,
    must: &mut Vec<Value>,
    must_not: &mut Vec<Value>,
) {
    for uuid in label_uuids(&labels.must_include) {
        must.push(json!({ "key": field, "match": { "value": uuid } }));
    }
    if !labels.must_exclude.is_empty() {
        must_not.push(json!({
            "key": field,
            "match": { "any": label_uuids(&labels.must_exclude) },
        }));
    }
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    status: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: String,
    score: f32,
    #[serde(default)]
    payload: Option<StoredPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::DateFilter;

    #[test]
    fn test_collection_urls() {
        let db = Qdrant::new("http://qdrant:6333").unwrap();
        assert_eq!(db.url([]).as_str(), "http://qdrant:6333/collections/content");
        let action = String::from("search");
        assert_eq!(
            db.url(["points", action.as_str()]).as_str(),
            "http://qdrant:6333/collections/content/points/search"
        );
    }

    fn filter() -> QueryFilter {
        QueryFilter {
            publication_date: DateFilter {
                gte: Some(10),
                lte: None,
            },
            authors: LabelFilter {
                must_include: [12, 5].into_iter().collect(),
                must_exclude: [3].into_iter().collect(),
            },
            tags: LabelFilter::default(),
        }
    }

    #[test]
    fn test_filter_translation() {
        let translated = translate_filter(&filter()).unwrap();
        assert_eq!(
            translated,
            json!({
                "must": [
                    { "key": "publication_date", "range": { "gte": 10 } },
                    { "key": "authors", "match": { "value": "00000000-0000-4005-8000-000000000005" } },
                    { "key": "authors", "match": { "value": "00000000-0000-400c-8000-00000000000c" } },
                ],
                "must_not": [
                    { "key": "authors", "match": { "any": ["00000000-0000-4003-8000-000000000003"] } },
                ],
            })
        );
    }

    #[test]
    fn test_unconstrained_filter_omitted() {
        assert_eq!(translate_filter(&QueryFilter::default()), None);
        let vector = [1.0f32, 2.0];
        let empty = QueryFilter::default();
        let request = SearchRequest {
            vector: &vector,
            filter: Some(&empty),
            k: 10,
            ef: 100,
            fetch_payload: false,
        };
        let body = search_body(&request);
        assert!(body.get("filter").is_none());
        assert_eq!(body["params"]["hnsw_ef"], 100);
        assert_eq!(body["limit"], 10);
    }

    #[test]
    fn test_search_response_parsing() {
        let response: SearchResponse = serde_json::from_value(json!({
            "result": [
                { "id": point_uuid(4), "score": 0.5, "version": 1 },
                { "id": point_uuid(2), "score": 0.25 },
            ],
            "status": "ok",
            "time": 0.001,
        }))
        .unwrap();
        assert_eq!(response.result.len(), 2);
        assert_eq!(parse_point_id(&response.result[0].id).unwrap(), 4);
    }
}
