//! Vector store client
//!
//! Talks to a Milvus-compatible RESTful v2 API: collection existence checks,
//! hybrid (multi-channel, server-fused) search and single-channel search.

use crate::config::VectorStoreConfig;
use crate::error::{Result, RetrieverError};
use crate::search::{
    ChannelParams, ChannelQuery, HybridSearchRequest, Record, RecordId, Reranker, SearchChannel,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HAS_COLLECTION_PATH: &str = "/v2/vectordb/collections/has";
const HYBRID_SEARCH_PATH: &str = "/v2/vectordb/entities/hybrid_search";
const SEARCH_PATH: &str = "/v2/vectordb/entities/search";

/// Store error code for a missing collection.
const CODE_COLLECTION_NOT_FOUND: i64 = 100;

const ID_KEY: &str = "id";
const DISTANCE_KEY: &str = "distance";

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Runs every channel and returns the store-fused ranking.
    async fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<Record>>;

    /// Runs one channel and returns its candidates in rank order.
    async fn search(
        &self,
        collection: &str,
        channel: &SearchChannel,
        output_fields: &[String],
    ) -> Result<Vec<Record>>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct HasCollectionData {
    has: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HasCollectionBody<'a> {
    collection_name: &'a str,
}

/// One channel of a hybrid search. The hybrid endpoint reads per-channel
/// tuning from `params`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnSearch {
    data: Vec<Value>,
    anns_field: String,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HybridSearchBody<'a> {
    collection_name: &'a str,
    search: Vec<AnnSearch>,
    rerank: Value,
    limit: usize,
    output_fields: &'a [String],
}

/// Single-channel search; the same tuning goes under `searchParams` here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    collection_name: &'a str,
    data: Vec<Value>,
    anns_field: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_params: Option<Value>,
    output_fields: &'a [String],
}

fn channel_data(channel: &SearchChannel) -> Vec<Value> {
    let data = match &channel.query {
        ChannelQuery::Dense(vector) => json!(vector),
        ChannelQuery::Sparse(text) => json!(text),
    };
    vec![data]
}

/// `{"params": {...}}` for a channel with tuning, `None` otherwise.
fn channel_tuning(params: &ChannelParams) -> Option<Value> {
    if params.is_empty() {
        return None;
    }
    let mut tuning = Map::new();
    if let Some(drop_ratio) = params.drop_ratio {
        tuning.insert("drop_ratio_search".to_string(), json!(wire_ratio(drop_ratio)));
    }
    if let Some(nprobe) = params.nprobe {
        tuning.insert("nprobe".to_string(), json!(nprobe));
    }
    Some(json!({ "params": tuning }))
}

/// Widens to f64 at six decimal places so 0.2 goes out as 0.2, not
/// 0.20000000298023224.
fn wire_ratio(ratio: f32) -> f64 {
    (f64::from(ratio) * 1e6).round() / 1e6
}

fn ann_search(channel: &SearchChannel) -> AnnSearch {
    AnnSearch {
        data: channel_data(channel),
        anns_field: channel.field.clone(),
        limit: channel.top_k,
        params: channel_tuning(&channel.params),
    }
}

fn rerank_directive(reranker: Reranker) -> Value {
    match reranker {
        Reranker::Rrf { k } => json!({ "strategy": "rrf", "params": { "k": k } }),
    }
}

/// Decodes result rows: the primary key, the distance/score, and every
/// other column as an output field.
fn decode_rows(data: Value) -> Result<Vec<Record>> {
    let rows = match data {
        Value::Array(rows) => rows,
        Value::Null => return Ok(vec![]),
        other => {
            return Err(RetrieverError::StoreUnavailable(format!(
                "unexpected search result shape: {}",
                other
            )))
        }
    };

    rows.into_iter()
        .map(|row| {
            let Value::Object(mut fields) = row else {
                return Err(RetrieverError::StoreUnavailable(
                    "search result row is not an object".to_string(),
                ));
            };
            let id: RecordId = fields
                .remove(ID_KEY)
                .ok_or_else(|| RetrieverError::StoreUnavailable("search result row has no id".to_string()))
                .and_then(|id| {
                    serde_json::from_value(id)
                        .map_err(|e| RetrieverError::StoreUnavailable(format!("invalid record id: {}", e)))
                })?;
            let score = fields
                .remove(DISTANCE_KEY)
                .and_then(|d| d.as_f64())
                .unwrap_or_default() as f32;
            Ok(Record { id, score, fields })
        })
        .collect()
}

#[derive(Clone)]
pub struct MilvusClient {
    client: reqwest::Client,
    base_url: String,
}

/// A request the store understood but refused.
struct StoreRejection {
    code: i64,
    message: String,
}

impl MilvusClient {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| RetrieverError::StoreUnavailable(format!("invalid token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrieverError::StoreUnavailable(format!("failed to build HTTP client: {}", e)))?;

        info!("Vector store client ready: {}", config.url);

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    /// POSTs `body` and unwraps the `{code, message, data}` envelope.
    /// Transport and decoding failures are errors; a non-zero `code` is
    /// handed back for the caller to classify.
    async fn call<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<std::result::Result<Value, StoreRejection>> {
        let started = Instant::now();
        let outcome = self.send(path, body).await;

        match &outcome {
            Ok(Ok(_)) => debug!("Vector store {} ok in {:?}", path, started.elapsed()),
            Ok(Err(rejection)) => debug!(
                "Vector store {} rejected in {:?}: code={}, message={}",
                path,
                started.elapsed(),
                rejection.code,
                rejection.message
            ),
            Err(e) => warn!("Vector store {} failed in {:?}: {}", path, started.elapsed(), e),
        }
        outcome
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<std::result::Result<Value, StoreRejection>> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(RetrieverError::StoreUnavailable(format!(
                "vector store returned {}: {}",
                status, error_text
            )));
        }

        let envelope: Envelope = resp.json().await.map_err(classify)?;
        if envelope.code == 0 {
            Ok(Ok(envelope.data))
        } else {
            Ok(Err(StoreRejection {
                code: envelope.code,
                message: envelope.message,
            }))
        }
    }
}

fn classify(err: reqwest::Error) -> RetrieverError {
    if err.is_timeout() {
        RetrieverError::Timeout(format!("vector store request: {}", err))
    } else {
        RetrieverError::StoreUnavailable(err.to_string())
    }
}

fn search_rejection(collection: &str, rejection: StoreRejection) -> RetrieverError {
    if rejection.code == CODE_COLLECTION_NOT_FOUND {
        RetrieverError::CollectionNotFound(collection.to_string())
    } else {
        RetrieverError::Channel(format!("code {}: {}", rejection.code, rejection.message))
    }
}

#[async_trait]
impl VectorStore for MilvusClient {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        let body = HasCollectionBody {
            collection_name: name,
        };
        match self.call(HAS_COLLECTION_PATH, &body).await? {
            Ok(data) => {
                let data: HasCollectionData = serde_json::from_value(data).map_err(|e| {
                    RetrieverError::StoreUnavailable(format!("malformed has-collection reply: {}", e))
                })?;
                Ok(data.has)
            }
            Err(rejection) => Err(RetrieverError::StoreUnavailable(format!(
                "has-collection refused with code {}: {}",
                rejection.code, rejection.message
            ))),
        }
    }

    async fn hybrid_search(&self, request: &HybridSearchRequest) -> Result<Vec<Record>> {
        let body = HybridSearchBody {
            collection_name: request.collection(),
            search: request.channels().iter().map(ann_search).collect(),
            rerank: rerank_directive(request.reranker()),
            limit: request.limit(),
            output_fields: request.output_fields(),
        };

        let data = self
            .call(HYBRID_SEARCH_PATH, &body)
            .await?
            .map_err(|rejection| search_rejection(request.collection(), rejection))?;

        let mut records = decode_rows(data)?;
        records.truncate(request.limit());
        Ok(records)
    }

    async fn search(
        &self,
        collection: &str,
        channel: &SearchChannel,
        output_fields: &[String],
    ) -> Result<Vec<Record>> {
        let body = SearchBody {
            collection_name: collection,
            data: channel_data(channel),
            anns_field: &channel.field,
            limit: channel.top_k,
            search_params: channel_tuning(&channel.params),
            output_fields,
        };

        let data = self
            .call(SEARCH_PATH, &body)
            .await?
            .map_err(|rejection| search_rejection(collection, rejection))?;

        let mut records = decode_rows(data)?;
        records.truncate(channel.top_k);
        Ok(records)
    }
}
