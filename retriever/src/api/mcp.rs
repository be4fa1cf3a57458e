// Tool-serving endpoint: JSON-RPC 2.0 over HTTP POST, exposing the `query` tool

use super::query::run_query;
use super::AppState;
use crate::models::{
    CallToolParams, CallToolResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, QueryInput,
    ToolDescriptor, JSONRPC_VERSION, PROTOCOL_VERSION, QUERY_TOOL_NAME,
};
use crate::{SERVER_NAME, SERVER_VERSION};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Rejection, Reply};

pub async fn handle_mcp(body: Bytes, state: AppState) -> Result<warp::reply::Response, Rejection> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Unparseable JSON-RPC body: {}", e);
            return Ok(respond(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::PARSE_ERROR,
                format!("parse error: {}", e),
            )));
        }
    };

    let fallback_id = raw.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return Ok(respond(JsonRpcResponse::failure(
                fallback_id,
                JsonRpcError::INVALID_REQUEST,
                format!("invalid request: {}", e),
            )))
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return Ok(respond(JsonRpcResponse::failure(
            fallback_id,
            JsonRpcError::INVALID_REQUEST,
            format!("unsupported jsonrpc version '{}'", request.jsonrpc),
        )));
    }

    let Some(id) = request.id else {
        debug!("Notification received: {}", request.method);
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    let response = dispatch(&state, id, &request.method, request.params).await;
    Ok(respond(response))
}

fn respond(response: JsonRpcResponse) -> warp::reply::Response {
    warp::reply::json(&response).into_response()
}

async fn dispatch(state: &AppState, id: Value, method: &str, params: Value) -> JsonRpcResponse {
    match method {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": [ToolDescriptor::query()] })),
        "tools/call" => call_tool(state, id, params).await,
        other => JsonRpcResponse::failure(
            id,
            JsonRpcError::METHOD_NOT_FOUND,
            format!("method not found: {}", other),
        ),
    }
}

async fn call_tool(state: &AppState, id: Value, params: Value) -> JsonRpcResponse {
    let params: CallToolParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::INVALID_PARAMS,
                format!("invalid tool call: {}", e),
            )
        }
    };

    if params.name != QUERY_TOOL_NAME {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::INVALID_PARAMS,
            format!("unknown tool: {}", params.name),
        );
    }

    let input: QueryInput = match serde_json::from_value(params.arguments) {
        Ok(input) => input,
        Err(e) => {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::INVALID_PARAMS,
                format!("invalid arguments for {}: {}", QUERY_TOOL_NAME, e),
            )
        }
    };

    info!("Received query tool request: {}", input.query);
    let result = match run_query(state, &input.query).await {
        Ok(output) => CallToolResult::output(&output),
        Err(e) => CallToolResult::error(e.to_string()),
    };

    JsonRpcResponse::success(id, json!(result))
}
