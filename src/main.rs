/// MCP Server Entry Point
///
/// Resolves configuration, sets up logging and the user store, then starts the
/// selected transport.
///
/// Environment Variables:
/// - SERVER_NAME: Name of the server (default: "user-registry")
/// - SERVER_VERSION: Version string (default: crate version)
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "stdio")
/// - HOST: Bind address for HTTP mode (default: "0.0.0.0")
/// - PORT: Port number for HTTP mode (default: 3000)
/// - WORKER_THREADS: HTTP worker count (default: CPU count, max 16)
/// - MCP_CONFIG_FILE: YAML config file (default: "kmcp.yaml")
/// - USERS_DATA_FILE: User store path (default: "src/data/users.json")
/// - LOG_FORMAT: "text" or "json" (default: "text")
/// - RUST_LOG: Log filter (default: "info")

mod core;
mod tools;

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::core::server::{self, AppState};
use crate::core::store::JsonFileStore;
use crate::core::utils::{LogFormat, ServerConfig, TransportMode};

/// Log to stderr only; stdout carries the JSON-RPC stream in STDIO mode.
///
/// # Arguments
/// * `format` - Text or JSON records
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_ansi(false).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is resolved before logging so the log format can come from it;
    // a configuration fault is still logged, in the default format.
    let config = ServerConfig::from_env();
    init_logging(config.as_ref().map(|c| c.log_format).unwrap_or_default());

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let store = JsonFileStore::new(&config.data_file);
    tracing::info!(data_file = %store.path().display(), "user store configured");

    let registry = server::initialize_tools(Arc::new(store));
    let state = AppState {
        server_name: config.name.clone(),
        server_version: config.version.clone(),
    };

    let result = match config.transport {
        TransportMode::Stdio => server::run_server_stdio(state, registry).await,
        TransportMode::Http => {
            server::run_server_http(state, registry, config.bind_addr(), config.workers).await
        }
        TransportMode::Both => {
            // STDIO runs in the background; the HTTP server owns the process lifetime
            let stdio_state = state.clone();
            let stdio_registry = registry.clone();
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_state, stdio_registry).await {
                    tracing::error!(error = %e, "STDIO server error");
                }
            });

            let http_result =
                server::run_server_http(state, registry, config.bind_addr(), config.workers).await;
            stdio_handle.abort();
            http_result
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error running server");
            ExitCode::FAILURE
        }
    }
}
