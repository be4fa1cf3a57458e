use super::AppState;
use crate::context::QueryContext;
use crate::error::Result;
use crate::models::{QueryInput, QueryOutput};
use std::time::Instant;
use tracing::{error, info};
use warp::{Rejection, Reply};

pub async fn handle_query(input: QueryInput, state: AppState) -> std::result::Result<impl Reply, Rejection> {
    let output = run_query(&state, &input.query)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&output))
}

/// Runs one query under a fresh context and records its outcome. Shared by
/// the REST route and the `query` tool.
pub async fn run_query(state: &AppState, query: &str) -> Result<QueryOutput> {
    let ctx = QueryContext::new(state.shutdown.clone()).with_optional_timeout(state.request_timeout);
    let started = Instant::now();
    info!("Processing query [{}]: {}", ctx.request_id, query);

    let result = state.retriever.query(&ctx, query).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    state.metrics.observe(outcome, started.elapsed().as_secs_f64());

    match result {
        Ok(top_k) => Ok(QueryOutput { top_k }),
        Err(e) => {
            error!("Query [{}] failed: {}", ctx.request_id, e);
            Err(e)
        }
    }
}
