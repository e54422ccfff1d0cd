/// create-user Tool
///
/// Validates the four user fields and appends a record to the user store.
/// Every failure, validation or storage, comes back as failure text rather
/// than a protocol error.

use std::sync::Arc;

use serde_json::Value;

use crate::core::server::{MCPTool, ToolHandler, ToolOutcome, ToolRegistry};
use crate::core::store::{NewUser, UserStore};

pub const TOOL_NAME: &str = "create-user";

/// Tool definition advertised by tools/list.
pub fn definition() -> MCPTool {
    MCPTool {
        name: TOOL_NAME.to_string(),
        description: "Create a new user in the database".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Full name of the user" },
                "email": { "type": "string", "description": "Email address" },
                "address": { "type": "string", "description": "Postal address" },
                "phone": { "type": "string", "description": "Phone number" }
            },
            "required": ["name", "email", "address", "phone"]
        }),
        annotations: Some(serde_json::json!({
            "title": "Create user",
            "readOnlyHint": false,
            "destructiveHint": false,
            "idempotentHint": false,
            "openWorldHint": true
        })),
    }
}

/// Register the create-user tool with the tool registry.
///
/// # Arguments
/// * `registry` - Registry the tool is added to
/// * `store` - User store the handler appends to
pub fn register(registry: &mut ToolRegistry, store: Arc<dyn UserStore>) {
    let handler: ToolHandler = Box::new(move |args: Value| handle(store.as_ref(), args));
    registry.register(definition(), handler);
}

/// Validate `args` and append the user.
///
/// # Arguments
/// * `store` - User store to append to
/// * `args` - Raw `arguments` object from tools/call
///
/// # Returns
/// `Success` with the new id in its text, or `Failure` with the error text
pub fn handle(store: &dyn UserStore, args: Value) -> ToolOutcome {
    let result = validate(args)
        .map_err(|e| format!("invalid arguments: {}", e))
        .and_then(|user| store.append(user).map_err(|e| e.to_string()));

    match result {
        Ok(id) => {
            tracing::info!(id, "user created");
            ToolOutcome::Success(format!("User {} created successfully", id))
        }
        Err(msg) => {
            tracing::error!(error = %msg, "create-user failed");
            ToolOutcome::Failure(format!("Failed to save user: {}", msg))
        }
    }
}

/// Check that `args` is an object carrying the four fields as strings.
///
/// Keys outside the four fields are ignored.
pub fn validate(args: Value) -> Result<NewUser, serde_json::Error> {
    serde_json::from_value(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::JsonFileStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn valid_args() -> Value {
        json!({
            "name": "A",
            "email": "a@x.com",
            "address": "1 Rd",
            "phone": "123"
        })
    }

    #[test]
    fn test_validate_accepts_four_strings() {
        let user = validate(valid_args()).unwrap();
        assert_eq!(user.name, "A");
        assert_eq!(user.phone, "123");
    }

    #[test]
    fn test_validate_rejects_each_missing_field() {
        for field in ["name", "email", "address", "phone"] {
            let mut args = valid_args();
            args.as_object_mut().unwrap().remove(field);
            let err = validate(args).unwrap_err();
            assert!(err.to_string().contains(field), "{}", err);
        }
    }

    #[test]
    fn test_validate_rejects_non_string_values() {
        for (field, bad) in [
            ("name", json!(42)),
            ("email", json!(null)),
            ("address", json!(["1 Rd"])),
            ("phone", json!(123)),
        ] {
            let mut args = valid_args();
            args[field] = bad;
            assert!(validate(args).is_err(), "{} should be rejected", field);
        }
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(validate(json!("A")).is_err());
        assert!(validate(json!(null)).is_err());
    }

    #[test]
    fn test_validate_ignores_extra_keys() {
        let mut args = valid_args();
        args["nickname"] = json!("ace");
        assert!(validate(args).is_ok());
    }

    #[test]
    fn test_handle_success_message_contains_id() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("users.json"));

        let outcome = handle(&store, valid_args());
        assert_eq!(outcome, ToolOutcome::Success("User 1 created successfully".to_string()));
    }

    #[test]
    fn test_handle_missing_fields_leaves_store_unchanged() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("users.json"));
        handle(&store, valid_args());
        handle(&store, valid_args());

        let outcome = handle(&store, json!({ "name": "A" }));
        assert!(outcome.is_error());
        assert!(outcome.text().starts_with("Failed to save user: invalid arguments:"));
        assert_eq!(store.load().unwrap().len(), 2);

        let outcome = handle(&store, valid_args());
        assert_eq!(outcome.text(), "User 3 created successfully");
    }

    #[test]
    fn test_handle_store_failure_is_soft() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("users.json");
        std::fs::write(&path, "{{{").unwrap();
        let store = JsonFileStore::new(&path);

        let outcome = handle(&store, valid_args());
        assert!(outcome.is_error());
        assert!(outcome.text().starts_with("Failed to save user: failed to parse"));
    }
}
