/// users://all Resource
///
/// Read-only listing of the whole user store as pretty-printed JSON.

use std::sync::Arc;

use crate::core::server::{MCPResource, ResourceHandler, ToolRegistry};
use crate::core::store::UserStore;

pub const RESOURCE_URI: &str = "users://all";

pub fn definition() -> MCPResource {
    MCPResource {
        uri: RESOURCE_URI.to_string(),
        name: "all-users".to_string(),
        description: "Every user in the database, in creation order".to_string(),
        mime_type: "application/json".to_string(),
    }
}

/// Register the listing resource with the tool registry.
///
/// # Arguments
/// * `registry` - Registry the resource is added to
/// * `store` - User store the handler reads
pub fn register(registry: &mut ToolRegistry, store: Arc<dyn UserStore>) {
    let handler: ResourceHandler = Box::new(move || read_all(store.as_ref()));
    registry.register_resource(definition(), handler);
}

/// Current store contents as JSON text; `[]` when nothing has been stored.
pub fn read_all(store: &dyn UserStore) -> Result<String, String> {
    let users = store.load().map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&users).map_err(|e| e.to_string())
}
