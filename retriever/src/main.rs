use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::Filter;

use retriever::api::{self, AppState};
use retriever::config::{Config, LoggingConfig};
use retriever::context::cancellation;
use retriever::embedding::EmbeddingClient;
use retriever::engine::HybridRetriever;
use retriever::error::handle_rejection;
use retriever::metrics::Metrics;
use retriever::middleware;
use retriever::vector_store::MilvusClient;
use retriever::{SERVER_NAME, SERVER_VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().skip(1).any(|arg| arg == "--version" || arg == "-V") {
        println!("{} {}", SERVER_NAME, SERVER_VERSION);
        return Ok(());
    }

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.logging);
    info!("Starting {} {}", SERVER_NAME, SERVER_VERSION);

    let addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("Invalid server.addr '{}'", config.server.addr))?;

    // Shared client handles
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let store = Arc::new(MilvusClient::new(&config.vector_store)?);
    let retriever = HybridRetriever::new(embedder, store, config.search.clone());
    info!(
        "Retrieving from collection {} ({:?} fusion, limit {})",
        config.search.collection, config.search.fusion_mode, config.search.limit
    );

    let (shutdown_handle, shutdown) = cancellation();
    let state = AppState {
        retriever,
        metrics: Metrics::new()?,
        request_timeout: config.server.request_timeout(),
        shutdown,
    };

    let routes = api::routes(state)
        .recover(handle_rejection)
        .with(warp::log("retriever::api"))
        .with(middleware::cors());

    let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
        shutdown_signal().await;
        info!("Shutting down server");
        // in-flight queries give up instead of holding the drain open
        shutdown_handle.cancel();
    })?;
    info!("Server listening on {}", bound);

    server.await;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
