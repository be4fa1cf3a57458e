pub mod api;
pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod search;
pub mod vector_store;

pub const SERVER_NAME: &str = "retriever-mcp-server";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
