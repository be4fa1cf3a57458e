// Hybrid retrieval engine: embeds the query, runs dense + sparse search,
// and returns the fused passages

use crate::config::{FusionMode, SearchConfig};
use crate::context::QueryContext;
use crate::embedding::Embedder;
use crate::error::{Result, RetrieverError};
use crate::fusion::{apply_drop_ratio, reciprocal_rank_fusion};
use crate::search::{HybridSearchRequest, Record, Reranker, SearchChannel};
use crate::vector_store::VectorStore;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Ordered passage texts, best first.
pub type QueryResult = Vec<String>;

/// Stateless and cheap to clone; all clones share the two client handles.
#[derive(Clone)]
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    settings: Arc<SearchConfig>,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, settings: SearchConfig) -> Self {
        Self {
            embedder,
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &SearchConfig {
        &self.settings
    }

    pub async fn query(&self, ctx: &QueryContext, text: &str) -> Result<QueryResult> {
        let span = info_span!("query", request_id = %ctx.request_id);
        self.run_query(ctx, text).instrument(span).await
    }

    async fn run_query(&self, ctx: &QueryContext, text: &str) -> Result<QueryResult> {
        let collection = &self.settings.collection;
        info!("Received query against {}: {}", collection, text);

        let exists = ctx
            .run("collection check", self.store.has_collection(collection))
            .await?;
        if !exists {
            return Err(RetrieverError::CollectionNotFound(collection.clone()));
        }

        let input = [text.to_string()];
        let vector = ctx
            .run("embedding", self.embedder.vectorize(&input))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RetrieverError::EmbeddingService("embedding service returned no vectors".to_string())
            })?;
        debug!("Query embedded into {} dimensions", vector.len());

        let request = self.compose(text, vector)?;
        let records = match self.settings.fusion_mode {
            FusionMode::Server => {
                ctx.run("hybrid search", self.store.hybrid_search(&request))
                    .await?
            }
            FusionMode::Client => ctx.run("channel search", self.fuse_locally(&request)).await?,
        };

        let passages = self.shape(records);
        info!("Query returned {} passages", passages.len());
        Ok(passages)
    }

    fn compose(&self, text: &str, vector: Vec<f32>) -> Result<HybridSearchRequest> {
        let s = &self.settings;
        HybridSearchRequest::new(
            s.collection.clone(),
            vec![
                SearchChannel::dense(s.dense_field.clone(), s.dense_top_k, vector),
                SearchChannel::sparse(s.sparse_field.clone(), s.sparse_top_k, text)
                    .with_drop_ratio(s.drop_ratio),
            ],
            s.limit,
            Reranker::Rrf { k: s.rrf_k },
            s.output_fields.clone(),
        )
    }

    /// Runs each channel on its own and fuses the candidate lists here,
    /// applying each channel's drop ratio first. One failed channel fails
    /// the whole search.
    async fn fuse_locally(&self, request: &HybridSearchRequest) -> Result<Vec<Record>> {
        let searches = request
            .channels()
            .iter()
            .map(|channel| self.store.search(request.collection(), channel, request.output_fields()));
        let results = futures::future::try_join_all(searches).await?;

        let candidates: Vec<Vec<Record>> = results
            .into_iter()
            .zip(request.channels())
            .map(|(records, channel)| match channel.params.drop_ratio {
                Some(drop_ratio) => apply_drop_ratio(records, drop_ratio),
                None => records,
            })
            .collect();

        let Reranker::Rrf { k } = request.reranker();
        Ok(reciprocal_rank_fusion(&candidates, k, request.limit()))
    }

    fn shape(&self, records: Vec<Record>) -> QueryResult {
        let field = &self.settings.text_field;
        records
            .into_iter()
            .take(self.settings.limit)
            .filter_map(|record| match record.text(field) {
                Some(text) => Some(text.to_string()),
                None => {
                    warn!("Record {} has no string '{}' field, skipping", record.id, field);
                    None
                }
            })
            .collect()
    }
}
