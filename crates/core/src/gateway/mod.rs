//! Tool Gateway: the database capability surface the loop drives.
//!
//! Every operation answers with a JSON payload. Failures are payloads too
//! (`{"success": false, "error": ..., "error_type": ...}`); nothing is raised
//! into the loop.

mod memory;
mod postgres;
mod rows;
pub mod sql_guard;

use std::fmt;

use scout_llm::provider::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use memory::{DisconnectedGateway, StaticGateway};
pub use postgres::PgGateway;

pub const NOT_CONNECTED: &str = "No database connection configured. Use /db to connect.";

/// The six operations the loop may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListSchemas,
    ListTables,
    InspectSchema,
    GetRelationships,
    ValidateSql,
    ExecuteQuery,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        Self::ListSchemas,
        Self::ListTables,
        Self::InspectSchema,
        Self::GetRelationships,
        Self::ValidateSql,
        Self::ExecuteQuery,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "list_schemas" => Some(Self::ListSchemas),
            "list_tables" => Some(Self::ListTables),
            "inspect_schema" => Some(Self::InspectSchema),
            "get_relationships" | "get_table_relationships" => Some(Self::GetRelationships),
            "validate_sql" => Some(Self::ValidateSql),
            "execute_query" => Some(Self::ExecuteQuery),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListSchemas => "list_schemas",
            Self::ListTables => "list_tables",
            Self::InspectSchema => "inspect_schema",
            Self::GetRelationships => "get_relationships",
            Self::ValidateSql => "validate_sql",
            Self::ExecuteQuery => "execute_query",
        }
    }

    /// Only query execution goes through the approval gate.
    pub fn needs_approval(self) -> bool {
        matches!(self, Self::ExecuteQuery)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors inside a gateway implementation. Turned into payloads by `invoke`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No database connection configured. Use /db to connect.")]
    NotConnected,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl GatewayError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotConnected | Self::Connect(_) | Self::Timeout(_) => "connection_error",
            Self::MissingArgument(_) => "invalid_arguments",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Database(_) => "database_error",
        }
    }

    pub fn into_payload(self) -> Value {
        error_payload(&self.to_string(), self.error_type())
    }
}

#[async_trait::async_trait]
pub trait ToolGateway: Send + Sync {
    /// Run one operation. Never fails: errors come back as payloads.
    async fn invoke(&self, name: ToolName, arguments: &Value) -> Value;

    fn is_connected(&self) -> bool;

    /// Short human description of the target, e.g. `postgres@localhost/app`.
    fn describe_target(&self) -> String;
}

pub fn error_payload(message: &str, error_type: &str) -> Value {
    json!({"success": false, "error": message, "error_type": error_type})
}

/// True for `{"success": false, ...}` or any object carrying an `error` field.
pub fn is_error_payload(result: &Value) -> bool {
    match result {
        Value::Object(map) => {
            map.get("success").and_then(Value::as_bool) == Some(false)
                || map.get("error").is_some_and(|e| !e.is_null())
        }
        _ => false,
    }
}

/// First non-empty string among `keys`; the model uses both `schema` and `schema_name`.
pub fn string_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Tool definitions advertised to the model, in `ToolName::ALL` order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let table_args = json!({
        "type": "object",
        "properties": {
            "table_name": { "type": "string", "description": "Name of the table" },
            "schema_name": { "type": "string", "description": "Schema name (default: public)" }
        },
        "required": ["table_name"]
    });
    let sql_arg = json!({
        "type": "object",
        "properties": {
            "sql": { "type": "string", "description": "A single SELECT statement" }
        },
        "required": ["sql"]
    });

    ToolName::ALL
        .iter()
        .map(|t| {
            let (description, input_schema) = match t {
                ToolName::ListSchemas => (
                    "List all user schemas in the PostgreSQL database.",
                    json!({"type": "object", "properties": {}}),
                ),
                ToolName::ListTables => (
                    "List tables in a schema with exact row counts and column counts.",
                    json!({
                        "type": "object",
                        "properties": {
                            "schema_name": { "type": "string", "description": "Schema name (default: public)" }
                        }
                    }),
                ),
                ToolName::InspectSchema => (
                    "Columns, types, primary keys, foreign keys, indexes and 3 sample rows of a table.",
                    table_args.clone(),
                ),
                ToolName::GetRelationships => (
                    "Foreign keys from this table to others and from others to this table.",
                    table_args.clone(),
                ),
                ToolName::ValidateSql => (
                    "Check a SELECT statement for safety and syntax without running it.",
                    sql_arg.clone(),
                ),
                ToolName::ExecuteQuery => (
                    "Run a read-only SELECT. Requires user approval before it executes.",
                    sql_arg.clone(),
                ),
            };
            ToolDefinition {
                name: t.as_str().to_owned(),
                description: description.to_owned(),
                input_schema,
            }
        })
        .collect()
}
