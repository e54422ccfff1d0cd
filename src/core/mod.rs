/// Core Server Framework Module
///
/// - error.rs: Typed store and configuration errors
/// - server.rs: MCP server implementation with HTTP and STDIO transport
/// - store.rs: JSON file user store
/// - utils.rs: Configuration loading

pub mod error;
pub mod server;
pub mod store;
pub mod utils;
