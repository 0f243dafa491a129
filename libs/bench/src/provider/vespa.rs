//! Vespa via the document and query APIs.
//!
//! The `content` schema and its `ann` rank profile (closeness on `embedding`)
//! ship with the application package, which is deployed with the cluster.
//!
//! Filter translation into YQL:
//! - `range(field, lo, hi)` with `-Infinity`/`Infinity` for a missing bound
//! - `(f contains a and f contains b)` for included labels
//! - `!(f contains a or f contains b)` for excluded labels
//!
//! `ef` maps onto `hnsw.exploreAdditionalHits = ef - k` with `targetHits = k`.
//! Closeness relevance is `1 / (1 + d)` and is converted back to a distance.

use std::collections::HashMap;
use std::fmt::Write;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use url::Url;

use crate::generate::{DateFilter, LabelFilter, QueryFilter};
use crate::identifier::IngestionParameters;

use super::http::{build_client, endpoint, parse_base_url, send_checked};
use super::{
    label_uuids, normalize_hits, parse_point_id, point_uuid, Point, SearchHit, SearchRequest,
    StoredPayload, VectorDatabase, COLLECTION,
};

const NAMESPACE: &str = "default";
const RANK_PROFILE: &str = "ann";
const QUERY_TIMEOUT: &str = "60s";

pub struct Vespa {
    client: Client,
    base_url: Url,
    document_type: String,
}

impl Vespa {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: parse_base_url(base_url)?,
            document_type: COLLECTION.to_string(),
        })
    }

    fn document_url(&self, id: u64) -> Url {
        let uuid = point_uuid(id);
        endpoint(
            &self.base_url,
            [
                "document",
                "v1",
                NAMESPACE,
                self.document_type.as_str(),
                "docid",
                uuid.as_str(),
            ],
        )
    }
}

#[async_trait]
impl VectorDatabase for Vespa {
    fn name(&self) -> &'static str {
        "vespa"
    }

    async fn initialize(&self, params: &IngestionParameters, dim: usize) -> Result<bool> {
        send_checked(self.client.get(endpoint(&self.base_url, ["state", "v1", "health"])))
            .await
            .context("Vespa container is not healthy")?;
        tracing::info!(
            m = params.m,
            ef_construction = params.ef_construction,
            dim,
            "Vespa schema comes from the deployed application package; HNSW parameters must match it"
        );
        Ok(true)
    }

    async fn upsert_batch(&self, points: &[Point<'_>]) -> Result<()> {
        let mut tasks = JoinSet::new();
        for point in points {
            let mut fields = serde_json::to_value(StoredPayload::from_document(point.payload))?;
            fields["id"] = json!(point_uuid(point.id));
            fields["embedding"] = json!(point.vector);
            let request = self
                .client
                .post(self.document_url(point.id))
                .json(&json!({ "fields": fields }));
            tasks.spawn(send_checked(request));
        }
        while let Some(result) = tasks.join_next().await {
            result.context("Vespa feed task panicked")??;
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        // the trailing empty segment is required, the endpoint is /search/
        let url = endpoint(&self.base_url, ["search", ""]);
        let response: SearchResponse = send_checked(self.client.post(url).json(&build_query(request)?))
            .await?
            .json()
            .await
            .context("Malformed vespa search response")?;

        let root = response.root;
        if let Some(errors) = root.errors {
            return Err(anyhow!("Vespa query failed: {}", errors));
        }

        let hits = root
            .children
            .into_iter()
            .map(|child| {
                let id = child
                    .fields
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("Vespa hit without id field: {:?}", child.fields))?;
                let id = parse_point_id(id)?;
                let payload = if request.fetch_payload {
                    let fields = Value::Object(child.fields.into_iter().collect());
                    Some(
                        serde_json::from_value::<StoredPayload>(fields)
                            .context("Malformed vespa hit fields")?
                            .into_document()?,
                    )
                } else {
                    None
                };
                Ok(SearchHit {
                    id,
                    distance: closeness_to_distance(child.relevance),
                    payload,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(normalize_hits(hits, request.k))
    }
}

/// Invert `closeness = 1 / (1 + d)`.
fn closeness_to_distance(relevance: f64) -> f32 {
    if relevance <= 0.0 {
        return f32::INFINITY;
    }
    (1.0 / relevance - 1.0).max(0.0) as f32
}

fn build_query(request: &SearchRequest<'_>) -> Result<Value> {
    let selector = if request.fetch_payload { "*" } else { "id" };
    let explore_additional_hits = request.ef.saturating_sub(request.k);
    let mut yql = format!(
        "select {} from {} where {{hnsw.exploreAdditionalHits:{}, targetHits:{}}}nearestNeighbor(embedding, query_embedding)",
        selector, COLLECTION, explore_additional_hits, request.k
    );
    if let Some(filter) = request.filter {
        append_filter(&mut yql, filter)?;
    }

    Ok(json!({
        "yql": yql,
        "ranking.profile": RANK_PROFILE,
        "input.query(query_embedding)": request.vector,
        "hits": request.k,
        // the 0.5s default drops queries under concurrent load
        "timeout": QUERY_TIMEOUT,
    }))
}

fn append_filter(yql: &mut String, filter: &QueryFilter) -> std::fmt::Result {
    append_date_range(yql, "publication_date", &filter.publication_date)?;
    append_labels(yql, "authors", &filter.authors)?;
    append_labels(yql, "tags", &filter.tags)
}

fn append_date_range(yql: &mut String, field: &str, date: &DateFilter) -> std::fmt::Result {
    if date.is_unconstrained() {
        return Ok(());
    }
    let lower = date.gte.map_or_else(|| "-Infinity".to_string(), |v| v.to_string());
    let upper = date.lte.map_or_else(|| "Infinity".to_string(), |v| v.to_string());
    write!(yql, " and range({}, {}, {})", field, lower, upper)
}

fn append_labels(yql: &mut String, field: &str, labels: &LabelFilter) -> std::fmt::Result {
    append_label_group(yql, field, &label_uuids(&labels.must_include), " and ", false)?;
    append_label_group(yql, field, &label_uuids(&labels.must_exclude), " or ", true)
}

fn append_label_group(
    yql: &mut String,
    field: &str,
    uuids: &[String],
    joiner: &str,
    negate: bool,
) -> std::fmt::Result {
    if uuids.is_empty() {
        return Ok(());
    }
    yql.push_str(" and ");
    if negate {
        yql.push('!');
    }
    yql.push('(');
    for (i, uuid) in uuids.iter().enumerate() {
        if i > 0 {
            yql.push_str(joiner);
        }
        write!(yql, "{} contains \"{}\"", field, uuid)?;
    }
    yql.push(')');
    Ok(())
}

#[derive(Deserialize)]
struct SearchResponse {
    root: Root,
}

#[derive(Deserialize)]
struct Root {
    #[serde(default)]
    children: Vec<Child>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Deserialize)]
struct Child {
    relevance: f64,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(vector: &'a [f32], filter: Option<&'a QueryFilter>, k: usize, ef: usize, fetch: bool) -> SearchRequest<'a> {
        SearchRequest {
            vector,
            filter,
            k,
            ef,
            fetch_payload: fetch,
        }
    }

    #[test]
    fn test_query_with_all_filters() {
        let filter = QueryFilter {
            publication_date: DateFilter {
                gte: Some(3661),
                lte: Some(1107309722),
            },
            authors: LabelFilter {
                must_include: [12, 5].into_iter().collect(),
                must_exclude: [3].into_iter().collect(),
            },
            tags: LabelFilter {
                must_include: [7].into_iter().collect(),
                must_exclude: [1, 321].into_iter().collect(),
            },
        };
        let vector = [2.0f32, 4.0, 6.0];
        let query = build_query(&request(&vector, Some(&filter), 10, 22, true)).unwrap();
        assert_eq!(
            query,
            json!({
                "yql": concat!(
                    "select * from content where",
                    " {hnsw.exploreAdditionalHits:12, targetHits:10}nearestNeighbor(embedding, query_embedding)",
                    " and range(publication_date, 3661, 1107309722)",
                    " and (authors contains \"00000000-0000-4005-8000-000000000005\" and authors contains \"00000000-0000-400c-8000-00000000000c\")",
                    " and !(authors contains \"00000000-0000-4003-8000-000000000003\")",
                    " and (tags contains \"00000000-0000-4007-8000-000000000007\")",
                    " and !(tags contains \"00000000-0000-4001-8000-000000000001\" or tags contains \"00000000-0000-4141-8000-000000000141\")"
                ),
                "input.query(query_embedding)": [2.0, 4.0, 6.0],
                "ranking.profile": "ann",
                "hits": 10,
                "timeout": "60s",
            })
        );
    }

    #[test]
    fn test_open_date_bounds() {
        let vector = [1.0f32];
        let upper_only = QueryFilter {
            publication_date: DateFilter { gte: None, lte: Some(3661) },
            ..Default::default()
        };
        let query = build_query(&request(&vector, Some(&upper_only), 10, 20, false)).unwrap();
        assert_eq!(
            query["yql"],
            "select id from content where {hnsw.exploreAdditionalHits:10, targetHits:10}nearestNeighbor(embedding, query_embedding) and range(publication_date, -Infinity, 3661)"
        );

        let lower_only = QueryFilter {
            publication_date: DateFilter { gte: Some(3661), lte: None },
            ..Default::default()
        };
        let query = build_query(&request(&vector, Some(&lower_only), 10, 10, false)).unwrap();
        assert!(query["yql"]
            .as_str()
            .unwrap()
            .ends_with("exploreAdditionalHits:0, targetHits:10}nearestNeighbor(embedding, query_embedding) and range(publication_date, 3661, Infinity)"));
    }

    #[test]
    fn test_no_filter() {
        let vector = [1.0f32];
        let query = build_query(&request(&vector, None, 15, 20, true)).unwrap();
        assert_eq!(
            query["yql"],
            "select * from content where {hnsw.exploreAdditionalHits:5, targetHits:15}nearestNeighbor(embedding, query_embedding)"
        );
    }

    #[test]
    fn test_closeness_conversion() {
        assert_eq!(closeness_to_distance(1.0), 0.0);
        assert!((closeness_to_distance(0.25) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_response_parsing() {
        let response: SearchResponse = serde_json::from_value(json!({
            "root": {
                "id": "toplevel",
                "relevance": 1.0,
                "fields": { "totalCount": 1 },
                "children": [
                    { "id": "index:content/0/abc", "relevance": 0.5, "fields": { "id": point_uuid(9) } }
                ]
            }
        }))
        .unwrap();
        assert_eq!(response.root.children.len(), 1);
        assert!(response.root.errors.is_none());
    }
}
