/// Tools Module
///
/// MCP tools and resources. Each module exports a `register` function that
/// adds its definition and handler to the registry during server startup.

pub mod create_user;
pub mod list_users;
