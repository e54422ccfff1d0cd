/// MCP Server Implementation
///
/// This module contains the core MCP server implementation including:
/// - JSON-RPC 2.0 request/response structures
/// - Registry of tools and read-only resources
/// - A single dispatcher shared by both transports
/// - HTTP server setup with Actix Web
/// - STDIO server implementation for line-based communication

use actix_web::{
    web, App, HttpServer, HttpResponse, Result,
    middleware::{Compress, Logger, DefaultHeaders},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::core::store::UserStore;
use crate::tools;

/// MCP protocol revision reported during initialize
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// JSON-RPC error codes
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;
const RESOURCE_NOT_FOUND: i32 = -32002;

/// Server metadata reported in MCP initialize responses.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
}

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// `id` is None only when the key is absent, which marks a notification.
/// An explicit `"id": null` is a request and gets a response.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MCPRequest {
    jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present_id",
        skip_serializing_if = "Option::is_none"
    )]
    id: Option<Value>,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

// Only called when the key is present, so a JSON null becomes Some(Null).
fn deserialize_present_id<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Exactly one of `result` and `error` is present.
#[derive(Serialize, Deserialize, Debug)]
pub struct MCPResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

impl MCPResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Deserialize, Debug)]
pub struct MCPError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// MCP tool definition, serialized as-is by tools/list.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MCPTool {
    /// Unique tool identifier (e.g., "create-user")
    pub name: String,
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    pub input_schema: Value,
    /// Behavior hints (readOnlyHint, destructiveHint, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

/// MCP resource definition, serialized as-is by resources/list.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MCPResource {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// Outcome of a tool invocation.
///
/// Failures are still delivered to the client as a normal result with
/// `isError: true`; they never become JSON-RPC errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Failure(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success(text) | ToolOutcome::Failure(text) => text,
        }
    }

    /// Render as an MCP `tools/call` result.
    fn into_result(self) -> Value {
        serde_json::json!({
            "content": [
                {
                    "type": "text",
                    "text": self.text()
                }
            ],
            "isError": self.is_error()
        })
    }
}

/// Tool handlers take the raw `arguments` object and always produce an outcome.
///
/// Handlers must be Send + Sync; HTTP workers share the registry.
pub type ToolHandler = Box<dyn Fn(Value) -> ToolOutcome + Send + Sync>;

/// Resource handlers return the resource body as text.
pub type ResourceHandler = Box<dyn Fn() -> std::result::Result<String, String> + Send + Sync>;

/// Registry of available MCP tools and resources.
///
/// Definitions are kept in registration order for the list methods; handlers
/// are looked up by tool name or resource URI.
pub struct ToolRegistry {
    /// Tool definitions in registration order (for tools/list)
    pub tools: Vec<MCPTool>,
    handlers: HashMap<String, ToolHandler>,
    /// Resource definitions in registration order (for resources/list)
    pub resources: Vec<MCPResource>,
    resource_handlers: HashMap<String, ResourceHandler>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            handlers: HashMap::new(),
            resources: Vec::new(),
            resource_handlers: HashMap::new(),
        }
    }

    /// Register a tool with the registry.
    ///
    /// # Arguments
    /// * `tool` - Tool definition with name, description, and input schema
    /// * `handler` - Function that executes the tool when called
    pub fn register(&mut self, tool: MCPTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }

    /// Register a read-only resource under its URI.
    ///
    /// # Arguments
    /// * `resource` - Resource definition; its `uri` is the lookup key
    /// * `handler` - Function producing the resource body
    pub fn register_resource(&mut self, resource: MCPResource, handler: ResourceHandler) {
        let uri = resource.uri.clone();
        self.resources.push(resource);
        self.resource_handlers.insert(uri, handler);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize and register all tools and resources.
///
/// # Arguments
/// * `store` - User store shared by every handler
///
/// # Returns
/// An Arc-wrapped registry ready to be shared between transports
pub fn initialize_tools(store: Arc<dyn UserStore>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    tools::create_user::register(&mut registry, store.clone());
    tools::list_users::register(&mut registry, store);

    Arc::new(registry)
}

/// Decode one raw JSON-RPC message.
///
/// # Returns
/// The request, or a `-32700` parse error response. The error carries the id
/// found in the raw JSON if there is one and None otherwise.
pub fn decode_request(raw: &str) -> std::result::Result<MCPRequest, MCPResponse> {
    serde_json::from_str::<MCPRequest>(raw).map_err(|e| {
        tracing::warn!(error = %e, "failed to parse JSON-RPC request");
        let id = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|partial| partial.get("id").cloned());
        MCPResponse::failure(id, PARSE_ERROR, format!("Parse error: {}", e))
    })
}

/// Route one request to its method handler.
///
/// # Arguments
/// * `state` - Server metadata for initialize
/// * `registry` - Tools and resources to dispatch to
/// * `req` - Decoded JSON-RPC request
///
/// # Returns
/// The response, or None for notifications, which must not be answered
pub fn handle_request(
    state: &AppState,
    registry: &ToolRegistry,
    req: MCPRequest,
) -> Option<MCPResponse> {
    let Some(id) = req.id else {
        tracing::debug!(method = %req.method, "notification received");
        return None;
    };
    let id = Some(id);

    if req.jsonrpc != "2.0" {
        return Some(MCPResponse::failure(id, INVALID_REQUEST, "Invalid JSON-RPC version"));
    }

    tracing::debug!(method = %req.method, "handling request");

    let response = match req.method.as_str() {
        "initialize" => MCPResponse::success(id, initialize_result(state)),
        "ping" => MCPResponse::success(id, serde_json::json!({})),
        "tools/list" => MCPResponse::success(id, serde_json::json!({ "tools": registry.tools })),
        "tools/call" => handle_tools_call(registry, id, req.params),
        "resources/list" => {
            MCPResponse::success(id, serde_json::json!({ "resources": registry.resources }))
        }
        "resources/read" => handle_resources_read(registry, id, req.params),
        _ => MCPResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", req.method),
        ),
    };

    Some(response)
}

fn initialize_result(state: &AppState) -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {}
        },
        "serverInfo": {
            "name": state.server_name,
            "version": state.server_version
        }
    })
}

/// Handle MCP tools/call: look up the tool by name and run it on `arguments`.
///
/// Missing `arguments` default to an empty object, which the tool's own
/// validation then rejects.
fn handle_tools_call(
    registry: &ToolRegistry,
    id: Option<Value>,
    params: Option<Value>,
) -> MCPResponse {
    let Some(params) = params else {
        return MCPResponse::failure(id, INVALID_PARAMS, "Invalid params");
    };

    let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    match registry.handlers.get(tool_name) {
        Some(handler) => MCPResponse::success(id, handler(arguments).into_result()),
        None => MCPResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Unknown tool: {}", tool_name),
        ),
    }
}

/// Handle MCP resources/read for a registered URI.
fn handle_resources_read(
    registry: &ToolRegistry,
    id: Option<Value>,
    params: Option<Value>,
) -> MCPResponse {
    let Some(uri) = params
        .as_ref()
        .and_then(|p| p.get("uri"))
        .and_then(|v| v.as_str())
    else {
        return MCPResponse::failure(id, INVALID_PARAMS, "Invalid params: missing uri");
    };

    let (Some(resource), Some(handler)) = (
        registry.resources.iter().find(|r| r.uri == uri),
        registry.resource_handlers.get(uri),
    ) else {
        return MCPResponse::failure(
            id,
            RESOURCE_NOT_FOUND,
            format!("Resource not found: {}", uri),
        );
    };

    match handler() {
        Ok(text) => MCPResponse::success(
            id,
            serde_json::json!({
                "contents": [
                    {
                        "uri": resource.uri,
                        "mimeType": resource.mime_type,
                        "text": text
                    }
                ]
            }),
        ),
        Err(e) => {
            tracing::error!(uri = %uri, error = %e, "resource read failed");
            MCPResponse::failure(id, INTERNAL_ERROR, e)
        }
    }
}

/// Health check endpoint handler.
///
/// Used by load balancers and monitoring systems to verify availability.
async fn health(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": state.server_name
    })))
}

/// Metrics endpoint handler.
///
/// # Arguments
/// * `counter` - Atomic counter tracking total MCP requests since start
async fn metrics_handler(counter: web::Data<AtomicU64>) -> Result<HttpResponse> {
    let count = counter.load(Ordering::Relaxed);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "requests_total": count,
        "status": "ok"
    })))
}

/// MCP JSON-RPC handler for HTTP mode.
///
/// The body is decoded by hand so malformed JSON gets a JSON-RPC parse error
/// rather than a plain-text 400. Tool handlers do blocking file I/O, so
/// dispatch runs on the blocking pool. Notifications are acknowledged with
/// 202 and an empty body.
///
/// # Arguments
/// * `state` - Server metadata
/// * `registry` - Tool registry shared by all workers
/// * `counter` - Request counter for the metrics endpoint
/// * `body` - Raw request body
async fn mcp_handler(
    state: web::Data<AppState>,
    registry: web::Data<ToolRegistry>,
    counter: web::Data<AtomicU64>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    counter.fetch_add(1, Ordering::Relaxed);

    let req = match decode_request(&String::from_utf8_lossy(&body)) {
        Ok(req) => req,
        Err(parse_error) => return Ok(HttpResponse::Ok().json(parse_error)),
    };

    let response = web::block(move || handle_request(&state, &registry, req))
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(match response {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::Accepted().finish(),
    })
}

/// Route table shared by the server and its tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/mcp", web::post().to(mcp_handler))
        .route("/", web::post().to(mcp_handler))
        .route("/", web::get().to(health));
}

/// Run the MCP server in HTTP mode.
///
/// # Arguments
/// * `state` - Server metadata for MCP protocol responses
/// * `registry` - Tools and resources to serve
/// * `bind_addr` - `host:port` to listen on
/// * `workers` - Number of worker threads
///
/// # Configuration
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive and request timeout: 30 seconds
/// - Disconnect timeout: 2 seconds
/// - Shutdown timeout: 10 seconds
pub async fn run_server_http(
    state: AppState,
    registry: Arc<ToolRegistry>,
    bind_addr: String,
    workers: usize,
) -> std::io::Result<()> {
    use std::time::Duration;

    tracing::info!(
        name = %state.server_name,
        version = %state.server_version,
        bind = %bind_addr,
        workers,
        "MCP server starting (HTTP mode)"
    );

    let app_state = web::Data::new(state);
    let tool_registry = web::Data::from(registry);
    let request_count = web::Data::new(AtomicU64::new(0));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(tool_registry.clone())
            .app_data(request_count.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
            )
            // %r = request line, %s = status, %D = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure_routes)
    })
    .workers(workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads JSON-RPC requests line by line from stdin and writes one response
/// line per request to stdout. Logging goes to stderr.
///
/// # Arguments
/// * `state` - Server metadata for MCP protocol responses
/// * `registry` - Tools and resources to serve
pub async fn run_server_stdio(
    state: AppState,
    registry: Arc<ToolRegistry>,
) -> std::io::Result<()> {
    tracing::info!(
        name = %state.server_name,
        version = %state.server_version,
        "MCP server starting (STDIO mode)"
    );

    let stdin = BufReader::with_capacity(8192, tokio::io::stdin());
    let stdout = BufWriter::with_capacity(8192, tokio::io::stdout());
    serve_lines(stdin, stdout, state, registry).await
}

/// Line-delimited JSON-RPC loop over any reader/writer pair.
///
/// Requests are processed one at a time. Malformed lines are answered only
/// when an id can be recovered from them.
///
/// # Returns
/// Ok when the reader hits EOF; the first I/O error otherwise
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    state: AppState,
    registry: Arc<ToolRegistry>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let state = Arc::new(state);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match decode_request(&line) {
            Ok(req) => {
                let state = state.clone();
                let registry = registry.clone();
                let task = tokio::task::spawn_blocking(move || {
                    handle_request(&state, &registry, req)
                });
                match task.await {
                    Ok(Some(response)) => response,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "request handler panicked");
                        continue;
                    }
                }
            }
            Err(parse_error) if parse_error.id.is_some() => parse_error,
            Err(_) => continue,
        };

        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                continue;
            }
        };

        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    tracing::info!("stdin closed, STDIO server stopping");
    Ok(())
}
