// Search request and result types shared by the store client, fusion and engine

use crate::error::{Result, RetrieverError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Primary key of a stored record. Collections key either by int64 or varchar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Str(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelQuery {
    Dense(Vec<f32>),
    /// Raw text; the store derives the sparse representation itself.
    Sparse(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelParams {
    pub drop_ratio: Option<f32>,
    pub nprobe: Option<u32>,
}

impl ChannelParams {
    pub fn is_empty(&self) -> bool {
        self.drop_ratio.is_none() && self.nprobe.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchChannel {
    pub field: String,
    pub top_k: usize,
    pub query: ChannelQuery,
    pub params: ChannelParams,
}

impl SearchChannel {
    pub fn dense(field: impl Into<String>, top_k: usize, vector: Vec<f32>) -> Self {
        Self {
            field: field.into(),
            top_k,
            query: ChannelQuery::Dense(vector),
            params: ChannelParams::default(),
        }
    }

    pub fn sparse(field: impl Into<String>, top_k: usize, text: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            top_k,
            query: ChannelQuery::Sparse(text.into()),
            params: ChannelParams::default(),
        }
    }

    pub fn with_drop_ratio(mut self, drop_ratio: f32) -> Self {
        self.params.drop_ratio = Some(drop_ratio);
        self
    }

    pub fn with_nprobe(mut self, nprobe: u32) -> Self {
        self.params.nprobe = Some(nprobe);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reranker {
    /// Reciprocal Rank Fusion with smoothing constant `k`.
    Rrf { k: u32 },
}

impl Default for Reranker {
    fn default() -> Self {
        Reranker::Rrf { k: 60 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchRequest {
    collection: String,
    channels: Vec<SearchChannel>,
    limit: usize,
    reranker: Reranker,
    output_fields: Vec<String>,
}

impl HybridSearchRequest {
    pub fn new(
        collection: impl Into<String>,
        channels: Vec<SearchChannel>,
        limit: usize,
        reranker: Reranker,
        output_fields: Vec<String>,
    ) -> Result<Self> {
        let collection = collection.into();
        if collection.is_empty() {
            return Err(RetrieverError::InvalidRequest("collection name is empty".to_string()));
        }
        if channels.len() < 2 {
            return Err(RetrieverError::Channel(format!(
                "hybrid search needs at least 2 channels, got {}",
                channels.len()
            )));
        }
        if let Some(channel) = channels.iter().find(|c| c.field.is_empty() || c.top_k == 0) {
            return Err(RetrieverError::Channel(format!(
                "invalid channel on field '{}' with top_k {}",
                channel.field, channel.top_k
            )));
        }
        if limit == 0 {
            return Err(RetrieverError::InvalidRequest("fused limit must be at least 1".to_string()));
        }

        Ok(Self {
            collection,
            channels,
            limit,
            reranker,
            output_fields,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn channels(&self) -> &[SearchChannel] {
        &self.channels
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn reranker(&self) -> Reranker {
        self.reranker
    }

    pub fn output_fields(&self) -> &[String] {
        &self.output_fields
    }
}

/// One row returned by the store: a candidate before fusion, or a fused hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub score: f32,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}
