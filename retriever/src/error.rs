use thiserror::Error;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

pub type Result<T> = std::result::Result<T, RetrieverError>;

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("collection does not exist: {0}")]
    CollectionNotFound(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Search channel error: {0}")]
    Channel(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RetrieverError {
    /// Short machine-readable kind, used as a metrics label and in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrieverError::CollectionNotFound(_) => "collection_not_found",
            RetrieverError::EmbeddingService(_) => "embedding_service_error",
            RetrieverError::StoreUnavailable(_) => "store_unavailable",
            RetrieverError::Channel(_) => "channel_error",
            RetrieverError::Timeout(_) => "timeout",
            RetrieverError::Cancelled => "cancelled",
            RetrieverError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RetrieverError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            RetrieverError::EmbeddingService(_) => StatusCode::BAD_GATEWAY,
            RetrieverError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RetrieverError::Channel(_) | RetrieverError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RetrieverError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // nginx's "client closed request"; the caller is usually gone by now
            RetrieverError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl Reject for RetrieverError {}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Rejection> {
    if let Some(api_err) = err.find::<RetrieverError>() {
        let json = warp::reply::json(&serde_json::json!({
            "error": api_err.kind(),
            "details": api_err.to_string(),
        }));

        Ok(warp::reply::with_status(json, api_err.status_code()))
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        let json = warp::reply::json(&serde_json::json!({
            "error": "invalid_request",
            "details": body_err.to_string(),
        }));

        Ok(warp::reply::with_status(json, StatusCode::BAD_REQUEST))
    } else {
        Err(err)
    }
}
