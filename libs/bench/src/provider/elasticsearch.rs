//! Elasticsearch dense vector kNN search.
//!
//! Filter translation, inside the kNN `filter` so it applies during the
//! graph search rather than after it:
//! - one `term` clause per included label in `bool.filter` (conjunction)
//! - one `terms` clause per field with all excluded labels in `bool.must_not`
//! - a `range` clause with `gte`/`lte` for the date bounds
//!
//! `l2_norm` similarity scores are `1 / (1 + d^2)`; hits are converted back to
//! euclidean distances before they are returned.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::generate::QueryFilter;
use crate::identifier::IngestionParameters;

use super::http::{body_to_error, build_client, endpoint, parse_base_url, send_checked};
use super::{
    label_uuids, normalize_hits, parse_point_id, point_uuid, Point, SearchHit, SearchRequest,
    StoredPayload, VectorDatabase, COLLECTION,
};

const NUMBER_OF_SHARDS: u32 = 3;
const NUMBER_OF_REPLICAS: u32 = 1;

pub struct Elasticsearch {
    client: Client,
    base_url: Url,
    index: String,
}

impl Elasticsearch {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: parse_base_url(base_url)?,
            index: COLLECTION.to_string(),
        })
    }

    fn url<'a>(&'a self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        endpoint(
            &self.base_url,
            std::iter::once(self.index.as_str()).chain(segments),
        )
    }
}

#[async_trait]
impl VectorDatabase for Elasticsearch {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn initialize(&self, params: &IngestionParameters, dim: usize) -> Result<bool> {
        let response = self
            .client
            .head(self.url([]))
            .send()
            .await
            .context("Failed to reach elasticsearch")?;
        match response.status() {
            StatusCode::OK => return Ok(false),
            StatusCode::NOT_FOUND => {}
            _ => return Err(body_to_error(response).await),
        }

        send_checked(self.client.put(self.url([])).json(&index_definition(params, dim)))
            .await
            .context("Failed to create elasticsearch index")?;
        tracing::info!(index = %self.index, m = params.m, ef_construction = params.ef_construction, "Created elasticsearch index");
        Ok(true)
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()> {
        let mut body = Vec::new();
        for point in points {
            serde_json::to_writer(&mut body, &json!({ "index": { "_id": point_uuid(point.id) } }))?;
            body.push(b'\n');
            let mut document = serde_json::to_value(StoredPayload::from_document(point.payload))?;
            document["embedding"] = json!(point.vector);
            serde_json::to_writer(&mut body, &document)?;
            body.push(b'\n');
        }

        let response: BulkResponse = send_checked(
            self.client
                .post(self.url(["_bulk"]))
                .header("Content-Type", "application/x-ndjson")
                .body(body),
        )
        .await?
        .json()
        .await
        .context("Malformed elasticsearch bulk response")?;
        if response.errors {
            anyhow::bail!("Elasticsearch bulk request reported item failures");
        }
        Ok(())
    }

    async fn finish_ingestion(&self, max_wait: Duration) -> Result<()> {
        send_checked(self.client.post(self.url(["_refresh"])))
            .await
            .context("Failed to refresh elasticsearch index")?;
        let url = endpoint(&self.base_url, ["_cluster", "health"]);
        send_checked(self.client.get(url).query(&[
            ("wait_for_status", "green".to_string()),
            ("timeout", format!("{}s", max_wait.as_secs())),
        ]))
        .await
        .context("Elasticsearch cluster did not turn green")?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let response: SearchResponse =
            send_checked(self.client.post(self.url(["_search"])).json(&search_body(request)))
                .await?
                .json()
                .await
                .context("Malformed elasticsearch search response")?;

        let hits = response
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                Ok(SearchHit {
                    id: parse_point_id(&hit.id)?,
                    distance: l2_norm_score_to_distance(hit.score),
                    payload: hit.source.map(StoredPayload::into_document).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(normalize_hits(hits, request.k))
    }
}

fn index_definition(params: &IngestionParameters, dim: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "number_of_shards": NUMBER_OF_SHARDS,
                "number_of_replicas": NUMBER_OF_REPLICAS,
            },
        },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "embedding": {
                    "type": "dense_vector",
                    "dims": dim,
                    "index": true,
                    "element_type": "float",
                    "similarity": "l2_norm",
                    "index_options": {
                        "type": "hnsw",
                        "m": params.m,
                        "ef_construction": params.ef_construction,
                    },
                },
                "publication_date": { "type": "long" },
                "authors": { "type": "keyword" },
                "tags": { "type": "keyword" },
                "link": { "type": "keyword" },
            },
        },
    })
}

/// Invert `score = 1 / (1 + d^2)`.
fn l2_norm_score_to_distance(score: f32) -> f32 {
    if score <= 0.0 {
        return f32::INFINITY;
    }
    (1.0 / score - 1.0).max(0.0).sqrt()
}

fn search_body(request: &SearchRequest<'_>) -> Value {
    let mut knn = json!({
        "field": "embedding",
        "query_vector": request.vector,
        "k": request.k,
        "num_candidates": request.ef,
    });
    if let Some(filter) = request.filter.and_then(translate_filter) {
        knn["filter"] = filter;
    }
    json!({
        "knn": knn,
        "size": request.k,
        "_source": if request.fetch_payload {
            json!({ "excludes": ["embedding"] })
        } else {
            json!(false)
        },
    })
}

/// Bool query for `filter`, `None` when it constrains nothing.
fn translate_filter(filter: &QueryFilter) -> Option<Value> {
    let mut must = Vec::new();
    let mut must_not = Vec::new();

    let date = &filter.publication_date;
    if !date.is_unconstrained() {
        let mut range = Map::new();
        if let Some(gte) = date.gte {
            range.insert("gte".to_string(), gte.into());
        }
        if let Some(lte) = date.lte {
            range.insert("lte".to_string(), lte.into());
        }
        must.push(json!({ "range": { "publication_date": range } }));
    }

    for (field, labels) in [("authors", &filter.authors), ("tags", &filter.tags)] {
        for uuid in label_uuids(&labels.must_include) {
            must.push(json!({ "term": { field: uuid } }));
        }
        if !labels.must_exclude.is_empty() {
            must_not.push(json!({ "terms": { field: label_uuids(&labels.must_exclude) } }));
        }
    }

    if must.is_empty() && must_not.is_empty() {
        return None;
    }
    let mut clauses = Map::new();
    if !must.is_empty() {
        clauses.insert("filter".to_string(), Value::Array(must));
    }
    if !must_not.is_empty() {
        clauses.insert("must_not".to_string(), Value::Array(must_not));
    }
    Some(json!({ "bool": clauses }))
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: f32,
    #[serde(rename = "_source", default)]
    source: Option<StoredPayload>,
}
