use crate::context::Cancellation;
use crate::engine::HybridRetriever;
use crate::metrics::Metrics;
use std::time::Duration;
use tracing::error;
use warp::{Filter, Rejection, Reply};

mod mcp;
mod query;

pub use query::run_query;

/// Largest request body accepted on the query and MCP routes.
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Everything a request handler needs. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub retriever: HybridRetriever,
    pub metrics: Metrics,
    pub request_timeout: Option<Duration>,
    /// Fires on server shutdown so in-flight queries stop waiting.
    pub shutdown: Cancellation,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(handle_metrics);

    let query_route = api
        .and(warp::path("query"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(query::handle_query);

    let mcp_route = warp::path("mcp")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(mcp::handle_mcp);

    health_route
        .or(metrics_route)
        .or(query_route)
        .or(mcp_route)
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn handle_metrics(state: AppState) -> warp::reply::Response {
    match state.metrics.render() {
        Ok((buffer, content_type)) => {
            warp::reply::with_header(buffer, "Content-Type", content_type).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            warp::reply::with_status(
                "failed to encode metrics",
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response()
        }
    }
}
