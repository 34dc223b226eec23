//! Quick intents: single-purpose requests answered straight from the gateway,
//! without a model round trip.

use serde_json::{Value, json};

use crate::gateway::{ToolGateway, ToolName, is_error_payload};

const TABLES_PER_SCHEMA: usize = 10;
const MAX_WORDS: usize = 8;
const MAX_DEFAULT_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickIntent {
    ListSchemas,
    ListTables,
    DescribeTable(String),
}

const COMPOUND: &[&str] = &[" and ", " also ", " as well", " plus ", " with "];
const ANALYTIC: &[&str] = &["top ", "most ", "least ", "best ", "worst ", "compare", "between"];
const TEMPORAL: &[&str] = &[
    "today", "yesterday", "this week", "last week", "this month", "last month", "recent", "latest",
];
const AGGREGATE: &[&str] = &["how many", "count of", "total", "sum of", "average", "avg "];
const RELATIONAL: &[&str] = &["relationship", "related", "foreign", "join", "connect"];
const FILTERING: &[&str] = &["where ", "filter", "find ", "search ", "get all", "show me all"];

/// Anything beyond a single lookup belongs to the full loop.
pub fn is_complex(text: &str) -> bool {
    let text = text.to_lowercase();
    [COMPOUND, ANALYTIC, TEMPORAL, AGGREGATE, RELATIONAL, FILTERING]
        .iter()
        .any(|group| group.iter().any(|p| text.contains(p)))
        || text.split_whitespace().count() > MAX_WORDS
}

pub fn detect(input: &str) -> Option<QuickIntent> {
    let text = input.trim().to_lowercase();
    if text.is_empty() || is_complex(&text) {
        return None;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if is_listing(&words, &["schema", "schemas"]) {
        return Some(QuickIntent::ListSchemas);
    }
    if is_listing(&words, &["table", "tables"]) {
        return Some(QuickIntent::ListTables);
    }
    described_table(&words).map(|t| QuickIntent::DescribeTable(t.to_owned()))
}

/// `list|show|get [all] <noun>`, a bare `<noun>`, or `what <noun> [are there|exist|do i have]`.
fn is_listing(words: &[&str], nouns: &[&str]) -> bool {
    let is_noun = |w: &str| nouns.contains(&w);
    match words {
        [noun] => is_noun(*noun),
        ["list" | "show" | "get", noun] => is_noun(*noun),
        ["list" | "show" | "get", "all", noun] => is_noun(*noun) && nouns[0] == "table",
        ["what", noun, rest @ ..] => {
            is_noun(*noun)
                && matches!(rest, [] | ["are", "there"] | ["exist"] | ["do", "i", "have"])
        }
        _ => false,
    }
}

fn described_table<'a>(words: &[&'a str]) -> Option<&'a str> {
    let name = match words {
        ["describe", t] | ["describe", t, "table"] | ["inspect", t] => *t,
        ["show", t, "schema"] | [t, "table", "schema"] => *t,
        ["schema", "of", t] | ["columns", "in", t] => *t,
        _ => return None,
    };
    is_identifier(name).then_some(name)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Answer `input` directly when it is a quick intent and a database is
/// connected. `None` hands the request to the loop.
pub async fn try_answer(gateway: &dyn ToolGateway, input: &str) -> Option<String> {
    if !gateway.is_connected() {
        return None;
    }
    let intent = detect(input)?;
    tracing::debug!(?intent, "quick intent");
    Some(answer(gateway, &intent).await)
}

pub async fn answer(gateway: &dyn ToolGateway, intent: &QuickIntent) -> String {
    match intent {
        QuickIntent::ListSchemas => {
            let result = gateway.invoke(ToolName::ListSchemas, &json!({})).await;
            render_schemas(&result)
        }
        QuickIntent::ListTables => list_all_tables(gateway).await,
        QuickIntent::DescribeTable(table) => describe_table(gateway, table).await,
    }
}

fn error_text(result: &Value) -> String {
    let message = result.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    format!("Error: {message}")
}

fn string_list(result: &Value, key: &str) -> Vec<String> {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

fn render_schemas(result: &Value) -> String {
    if is_error_payload(result) {
        return error_text(result);
    }
    let schemas = string_list(result, "schemas");
    if schemas.is_empty() {
        return "No schemas found in the database.".to_owned();
    }
    let mut out = format!("**Found {} schemas:**\n\n", schemas.len());
    for s in &schemas {
        out.push_str(&format!("  - `{s}`\n"));
    }
    out
}

async fn list_all_tables(gateway: &dyn ToolGateway) -> String {
    let schemas = gateway.invoke(ToolName::ListSchemas, &json!({})).await;
    if is_error_payload(&schemas) {
        return error_text(&schemas);
    }

    let mut out = String::from("**Tables in database:**\n\n");
    let mut total = 0;
    for schema in string_list(&schemas, "schemas") {
        let result = gateway.invoke(ToolName::ListTables, &json!({ "schema_name": &schema })).await;
        let names: Vec<&str> = result
            .get("tables")
            .and_then(Value::as_array)
            .map(|tables| {
                tables
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str).or_else(|| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        if names.is_empty() {
            continue;
        }
        out.push_str(&format!("**Schema `{schema}`:** ({} tables)\n", names.len()));
        for name in names.iter().take(TABLES_PER_SCHEMA) {
            out.push_str(&format!("  - `{name}`\n"));
        }
        if names.len() > TABLES_PER_SCHEMA {
            out.push_str(&format!("  ... and {} more\n", names.len() - TABLES_PER_SCHEMA));
        }
        out.push('\n');
        total += names.len();
    }

    if total == 0 {
        return "No tables found in the database.".to_owned();
    }
    out.push_str(&format!("**Total: {total} tables**"));
    out
}

/// First schema holding `table` wins.
async fn describe_table(gateway: &dyn ToolGateway, table: &str) -> String {
    let schemas = gateway.invoke(ToolName::ListSchemas, &json!({})).await;
    let mut candidates = string_list(&schemas, "schemas");
    if candidates.is_empty() {
        candidates.push("public".to_owned());
    }

    for schema in candidates {
        let args = json!({ "table_name": table, "schema_name": &schema });
        let result = gateway.invoke(ToolName::InspectSchema, &args).await;
        if is_error_payload(&result) {
            continue;
        }
        let Some(columns) = result.get("columns").and_then(Value::as_array).filter(|c| !c.is_empty()) else {
            continue;
        };
        let mut out = format!("**Table `{schema}.{table}` structure:**\n\n");
        out.push_str("| Column | Type | Nullable | Default |\n");
        out.push_str("|--------|------|----------|---------|\n");
        for col in columns {
            let name = col.get("name").and_then(Value::as_str).unwrap_or("?");
            let ty = col.get("type").and_then(Value::as_str).unwrap_or("?");
            let nullable = if col.get("nullable").and_then(Value::as_bool).unwrap_or(false) { "Yes" } else { "No" };
            let default = match col.get("default") {
                Some(Value::String(s)) if !s.is_empty() => shorten(s),
                Some(v) if !v.is_null() => shorten(&v.to_string()),
                _ => "-".to_owned(),
            };
            out.push_str(&format!("| `{name}` | {ty} | {nullable} | {default} |\n"));
        }
        return out;
    }
    format!("Table `{table}` not found in any schema.")
}

fn shorten(s: &str) -> String {
    if s.chars().count() > MAX_DEFAULT_CHARS {
        let head: String = s.chars().take(MAX_DEFAULT_CHARS - 3).collect();
        format!("{head}...")
    } else {
        s.to_owned()
    }
}
