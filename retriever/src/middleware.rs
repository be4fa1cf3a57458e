pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Content-Type",
            "Authorization",
            "Accept",
            "Content-Length",
            // MCP clients send these on every call after initialize
            "Mcp-Session-Id",
            "Mcp-Protocol-Version",
        ])
        .allow_methods(vec!["POST", "GET", "OPTIONS"])
}
