// Drives the server the way an MCP client would: list tools, then call
// `query` with a sample question, against in-process fake backends.

use retriever::api::{self, AppState};
use retriever::config::{EmbeddingConfig, FusionMode, SearchConfig, VectorStoreConfig};
use retriever::context::Cancellation;
use retriever::embedding::EmbeddingClient;
use retriever::engine::HybridRetriever;
use retriever::error::handle_rejection;
use retriever::metrics::Metrics;
use retriever::vector_store::MilvusClient;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

fn spawn_embedding_service() -> SocketAddr {
    let route = warp::post()
        .and(warp::path("embeddings"))
        .and(warp::body::json())
        .map(|body: Value| {
            let inputs = body["input"].as_array().cloned().unwrap_or_default();
            let data: Vec<Value> = inputs
                .iter()
                .enumerate()
                .map(|(index, _)| json!({"embedding": [0.1, 0.2, 0.3, 0.4], "index": index, "object": "embedding"}))
                .collect();
            warp::reply::json(&json!({
                "model": body["model"],
                "object": "list",
                "data": data,
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            }))
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn row(id: i64, distance: f64) -> Value {
    json!({"id": id, "distance": distance, "text": format!("result{}", id), "metadata": {"source": "manual.pdf"}})
}

fn spawn_vector_store(collection_exists: bool) -> SocketAddr {
    let has = warp::path!("v2" / "vectordb" / "collections" / "has")
        .and(warp::body::json())
        .map(move |body: Value| {
            let has = collection_exists && body["collectionName"] == "pdf_collection";
            warp::reply::json(&json!({"code": 0, "data": {"has": has}}))
        });

    // server-side fusion of dense [1, 2] and sparse [2, 3]
    let hybrid = warp::path!("v2" / "vectordb" / "entities" / "hybrid_search")
        .and(warp::body::json())
        .map(|body: Value| {
            assert_eq!(body["collectionName"], "pdf_collection");
            assert_eq!(body["limit"], 2);
            assert_eq!(body["outputFields"], json!(["text", "metadata"]));
            assert_eq!(body["rerank"], json!({"strategy": "rrf", "params": {"k": 60}}));
            assert_eq!(body["search"].as_array().map(Vec::len), Some(2));

            let dense = &body["search"][0];
            assert_eq!(dense["annsField"], "vector_dense");
            assert_eq!(dense["limit"], 2);
            assert_eq!(dense["data"][0].as_array().map(Vec::len), Some(4));

            let sparse = &body["search"][1];
            assert_eq!(sparse["annsField"], "vector_sparse");
            assert_eq!(sparse["limit"], 2);
            assert_eq!(sparse["data"], json!(["example"]));
            assert_eq!(sparse["params"], json!({"params": {"drop_ratio_search": 0.2}}));
            warp::reply::json(&json!({"code": 0, "data": [row(2, 0.0325), row(1, 0.0164)]}))
        });

    let search = warp::path!("v2" / "vectordb" / "entities" / "search")
        .and(warp::body::json())
        .map(|body: Value| {
            assert_eq!(body["collectionName"], "pdf_collection");
            assert_eq!(body["limit"], 2);
            assert_eq!(body["outputFields"], json!(["text", "metadata"]));
            let data = if body["annsField"] == "vector_dense" {
                assert!(body.get("searchParams").is_none());
                json!([row(1, 0.91), row(2, 0.88)])
            } else {
                assert_eq!(body["annsField"], "vector_sparse");
                assert_eq!(body["data"], json!(["example"]));
                assert_eq!(body["searchParams"], json!({"params": {"drop_ratio_search": 0.2}}));
                json!([row(2, 6.2), row(3, 4.9)])
            };
            warp::reply::json(&json!({"code": 0, "data": data}))
        });

    let routes = warp::post().and(has.or(hybrid).or(search));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn spawn_server(fusion_mode: FusionMode, collection_exists: bool) -> SocketAddr {
    let embedding_addr = spawn_embedding_service();
    let store_addr = spawn_vector_store(collection_exists);

    let embedder = EmbeddingClient::new(&EmbeddingConfig {
        url: format!("http://{}/embeddings", embedding_addr),
        dimensions: Some(4),
        ..EmbeddingConfig::default()
    })
    .unwrap();
    let store = MilvusClient::new(&VectorStoreConfig {
        url: format!("http://{}", store_addr),
        ..VectorStoreConfig::default()
    })
    .unwrap();

    let state = AppState {
        retriever: HybridRetriever::new(
            Arc::new(embedder),
            Arc::new(store),
            SearchConfig {
                fusion_mode,
                ..SearchConfig::default()
            },
        ),
        metrics: Metrics::new().unwrap(),
        request_timeout: None,
        shutdown: Cancellation::never(),
    };

    let routes = api::routes(state).recover(handle_rejection);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

async fn rpc(client: &reqwest::Client, addr: SocketAddr, id: u64, method: &str, params: Value) -> Value {
    client
        .post(format!("http://{}/mcp", addr))
        .json(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn client_session_lists_and_calls_query_tool() {
    let addr = spawn_server(FusionMode::Server, true);
    let client = reqwest::Client::new();

    let init = rpc(&client, addr, 1, "initialize", json!({"protocolVersion": "2025-06-18"})).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "retriever-mcp-server");

    let tools = rpc(&client, addr, 2, "tools/list", json!({})).await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["query"]);

    let call = rpc(
        &client,
        addr,
        3,
        "tools/call",
        json!({"name": "query", "arguments": {"query": "example"}}),
    )
    .await;
    assert_eq!(call["result"]["isError"], false);
    assert_eq!(
        call["result"]["structuredContent"],
        json!({"top_k": ["result2", "result1"]})
    );
}

#[tokio::test]
async fn client_side_fusion_gives_the_same_ranking() {
    let addr = spawn_server(FusionMode::Client, true);
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(format!("http://{}/api/v1/query", addr))
        .json(&json!({"query": "example"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp, json!({"top_k": ["result2", "result1"]}));
}

#[tokio::test]
async fn missing_collection_fails_the_call() {
    let addr = spawn_server(FusionMode::Server, false);
    let client = reqwest::Client::new();

    let call = rpc(
        &client,
        addr,
        1,
        "tools/call",
        json!({"name": "query", "arguments": {"query": "example"}}),
    )
    .await;
    assert_eq!(call["result"]["isError"], true);
    assert_eq!(
        call["result"]["content"][0]["text"],
        "collection does not exist: pdf_collection"
    );

    let rest = client
        .post(format!("http://{}/api/v1/query", addr))
        .json(&json!({"query": "example"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rest.status().as_u16(), 404);
}
