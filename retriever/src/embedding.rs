// Embedding client: turns query text into dense vectors via an
// OpenAI-compatible embeddings endpoint

use crate::config::EmbeddingConfig;
use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub type DenseVector = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn vectorize(&self, texts: &[String]) -> Result<Vec<DenseVector>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    model: String,
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    // the service speaks float64; narrowed to f32 on the way out
    embedding: Vec<f64>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: Option<usize>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| RetrieverError::EmbeddingService(format!("invalid API key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrieverError::EmbeddingService(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Embedding client ready: endpoint={}, model={}, timeout={}s",
            config.url, config.model, config.timeout_secs
        );

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    fn decode(&self, texts: &[String], mut response: EmbeddingsResponse) -> Result<Vec<DenseVector>> {
        if response.data.len() != texts.len() {
            return Err(RetrieverError::EmbeddingService(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        let mut vectors = Vec::with_capacity(response.data.len());
        for (position, data) in response.data.into_iter().enumerate() {
            if data.index != position {
                return Err(RetrieverError::EmbeddingService(format!(
                    "embedding indices are not contiguous: missing index {}",
                    position
                )));
            }
            if let Some(dimensions) = self.dimensions {
                if data.embedding.len() != dimensions {
                    return Err(RetrieverError::EmbeddingService(format!(
                        "embedding has {} dimensions, expected {}",
                        data.embedding.len(),
                        dimensions
                    )));
                }
            }
            vectors.push(data.embedding.into_iter().map(|v| v as f32).collect());
        }
        Ok(vectors)
    }
}

fn classify(err: reqwest::Error) -> RetrieverError {
    if err.is_timeout() {
        RetrieverError::Timeout(format!("embedding request: {}", err))
    } else {
        RetrieverError::EmbeddingService(err.to_string())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn vectorize(&self, texts: &[String]) -> Result<Vec<DenseVector>> {
        if texts.is_empty() {
            return Err(RetrieverError::EmbeddingService("no input texts".to_string()));
        }

        let started = Instant::now();
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(RetrieverError::EmbeddingService(format!(
                "embedding service returned {}: {}",
                status, error_text
            )));
        }

        let response: EmbeddingsResponse = resp.json().await.map_err(classify)?;
        if let Some(usage) = &response.usage {
            debug!(
                "Embedding usage: model={}, prompt_tokens={}, total_tokens={}",
                response.model, usage.prompt_tokens, usage.total_tokens
            );
        }

        let vectors = self.decode(texts, response)?;
        debug!(
            "Vectorized {} texts in {:?}",
            vectors.len(),
            started.elapsed()
        );
        Ok(vectors)
    }
}
