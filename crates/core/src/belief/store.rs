use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sql_heuristic::{extract_table_name_heuristic, is_count_query};
use crate::gateway::{ToolName, is_error_payload, string_arg};

/// One result row as returned by `execute_query`.
pub type Row = Value;

const MAX_SAMPLE_ROWS: usize = 5;
const DESCRIBE_TABLES_PER_SCHEMA: usize = 10;
const DESCRIBE_COLUMNS_PER_TABLE: usize = 5;
const DESCRIBE_FACTS: usize = 5;
const DESCRIBE_DISPROVEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub outgoing: Vec<Value>,
    pub incoming: Vec<Value>,
}

/// Verified knowledge about the target database.
///
/// Structural maps are only written from successful tool results. `proven_facts`
/// is append-only with exact-string dedup for the lifetime of one goal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeliefStore {
    pub known_schemas: BTreeSet<String>,
    pub known_tables: BTreeMap<String, Vec<String>>,
    pub known_columns: BTreeMap<String, Vec<ColumnInfo>>,
    pub known_relationships: BTreeMap<String, RelationshipInfo>,
    pub verified_row_counts: BTreeMap<String, i64>,
    pub sampled_rows: BTreeMap<String, Vec<Row>>,
    proven_facts: Vec<String>,
    disproven_assumptions: Vec<String>,
}

impl BeliefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proven_facts(&self) -> &[String] {
        &self.proven_facts
    }

    pub fn disproven_assumptions(&self) -> &[String] {
        &self.disproven_assumptions
    }

    /// Nothing verified yet.
    pub fn is_empty(&self) -> bool {
        self.known_schemas.is_empty()
            && self.known_tables.is_empty()
            && self.known_columns.is_empty()
            && self.known_relationships.is_empty()
            && self.proven_facts.is_empty()
            && self.disproven_assumptions.is_empty()
    }

    /// Known schemas whose tables have not been listed yet, in name order.
    pub fn unlisted_schemas(&self) -> Vec<String> {
        self.known_schemas
            .iter()
            .filter(|s| !self.known_tables.contains_key(*s))
            .cloned()
            .collect()
    }

    /// Append a fact unless the exact string is already present.
    pub fn add_fact(&mut self, fact: impl Into<String>) -> bool {
        push_unique(&mut self.proven_facts, fact.into())
    }

    pub fn add_disproven(&mut self, assumption: impl Into<String>) -> bool {
        push_unique(&mut self.disproven_assumptions, assumption.into())
    }

    /// Fold one tool result into the store. Error payloads and results that do
    /// not have the expected shape are ignored. Returns whether anything changed.
    pub fn absorb(&mut self, tool: ToolName, args: &Value, result: &Value) -> bool {
        if is_error_payload(result) {
            tracing::debug!(tool = %tool, "belief store skipped error result");
            return false;
        }
        let changed = match tool {
            ToolName::ListSchemas => self.absorb_schemas(result),
            ToolName::ListTables => self.absorb_tables(args, result),
            ToolName::InspectSchema => self.absorb_columns(args, result),
            ToolName::GetRelationships => self.absorb_relationships(args, result),
            ToolName::ExecuteQuery => self.absorb_query(args, result),
            ToolName::ValidateSql => false,
        };
        if !changed {
            tracing::debug!(tool = %tool, "tool result carried nothing to absorb");
        }
        changed
    }

    fn absorb_schemas(&mut self, result: &Value) -> bool {
        let Some(list) = result.get("schemas").and_then(Value::as_array) else {
            return false;
        };
        let schemas: BTreeSet<String> = list.iter().filter_map(Value::as_str).map(str::to_owned).collect();
        let fact = if schemas.is_empty() {
            "Database has no user schemas".to_owned()
        } else {
            let names: Vec<&str> = schemas.iter().map(String::as_str).collect();
            format!("Database has {} schema(s): {}", schemas.len(), names.join(", "))
        };
        self.known_schemas = schemas;
        self.add_fact(fact);
        true
    }

    fn absorb_tables(&mut self, args: &Value, result: &Value) -> bool {
        let Some(list) = result.get("tables").and_then(Value::as_array) else {
            return false;
        };
        let schema = string_arg(args, &["schema", "schema_name"]).unwrap_or("public").to_owned();
        let names: Vec<String> = list
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str).or_else(|| t.as_str()))
            .map(str::to_owned)
            .collect();
        let fact = if names.is_empty() {
            format!("Schema '{schema}' has no tables")
        } else {
            format!(
                "Schema '{schema}' has {} table(s): {}",
                names.len(),
                truncated_list(&names, DESCRIBE_TABLES_PER_SCHEMA)
            )
        };
        self.known_tables.insert(schema, names);
        self.add_fact(fact);
        true
    }

    fn absorb_columns(&mut self, args: &Value, result: &Value) -> bool {
        let Some(list) = result.get("columns") else {
            return false;
        };
        let columns: Vec<ColumnInfo> = match serde_json::from_value(list.clone()) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "inspect_schema columns not understood");
                return false;
            }
        };
        let Some(key) = qualified_table(args) else {
            return false;
        };
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let fact = format!(
            "Table {key} has {} column(s): {}",
            names.len(),
            truncated_list(&names, DESCRIBE_COLUMNS_PER_TABLE)
        );
        self.known_columns.insert(key, columns);
        self.add_fact(fact);
        true
    }

    fn absorb_relationships(&mut self, args: &Value, result: &Value) -> bool {
        let Some(key) = qualified_table(args) else {
            return false;
        };
        let list = |field: &str| {
            result.get(field).and_then(Value::as_array).cloned().unwrap_or_default()
        };
        if result.get("outgoing_relationships").is_none() && result.get("incoming_relationships").is_none() {
            return false;
        }
        let info = RelationshipInfo {
            outgoing: list("outgoing_relationships"),
            incoming: list("incoming_relationships"),
        };
        self.known_relationships.insert(key, info);
        true
    }

    fn absorb_query(&mut self, args: &Value, result: &Value) -> bool {
        let Some(rows) = result.get("data").and_then(Value::as_array) else {
            return false;
        };
        let sql = string_arg(args, &["sql", "query"]).unwrap_or_default();
        let row_count = result
            .get("row_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(rows.len());
        let table = extract_table_name_heuristic(sql);
        let target = table.clone().unwrap_or_else(|| "query".to_owned());

        if row_count == 0 || rows.is_empty() {
            self.add_fact(format!("Query on {target} returned 0 rows - investigate: {sql}"));
            return true;
        }

        if is_count_query(sql) {
            let columns = result.get("columns").and_then(Value::as_array);
            if let (Some(t), Some(count)) = (&table, first_value(&rows[0], columns).and_then(as_count)) {
                self.verified_row_counts.insert(t.clone(), count);
                self.add_fact(format!("{t} has {count} rows (verified by COUNT)"));
            }
        }

        let sample: Vec<Row> = rows.iter().take(MAX_SAMPLE_ROWS).cloned().collect();
        let n = sample.len();
        self.sampled_rows.insert(target.clone(), sample);
        self.add_fact(format!("Sampled {n} row(s) from {target}"));
        true
    }

    /// Deterministic multi-section summary placed in every prompt.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "No verified knowledge yet.".to_owned();
        }
        let mut out: Vec<String> = Vec::new();

        if !self.known_schemas.is_empty() {
            let names: Vec<&str> = self.known_schemas.iter().map(String::as_str).collect();
            out.push(format!("**Known schemas:** {}", names.join(", ")));
        }

        if !self.known_tables.is_empty() {
            out.push("**Tables:**".to_owned());
            for (schema, tables) in &self.known_tables {
                if tables.is_empty() {
                    out.push(format!("  {schema}: (none)"));
                } else {
                    out.push(format!("  {schema}: {}", truncated_list(tables, DESCRIBE_TABLES_PER_SCHEMA)));
                }
            }
        }

        if !self.known_columns.is_empty() {
            out.push("**Inspected tables:**".to_owned());
            for (table, columns) in &self.known_columns {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        if c.is_primary_key {
                            format!("{} ({}, pk)", c.name, c.data_type)
                        } else {
                            format!("{} ({})", c.name, c.data_type)
                        }
                    })
                    .collect();
                out.push(format!("  {table}: {}", truncated_list(&cols, DESCRIBE_COLUMNS_PER_TABLE)));
            }
        }

        if !self.known_relationships.is_empty() {
            out.push("**Relationships:**".to_owned());
            for (table, rel) in &self.known_relationships {
                out.push(format!("  {table}: {} outgoing, {} incoming", rel.outgoing.len(), rel.incoming.len()));
            }
        }

        if !self.verified_row_counts.is_empty() {
            out.push("**Verified row counts:**".to_owned());
            for (table, count) in &self.verified_row_counts {
                out.push(format!("  {table}: {count}"));
            }
        }

        if !self.proven_facts.is_empty() {
            out.push("**Proven facts:**".to_owned());
            for fact in last_n(&self.proven_facts, DESCRIBE_FACTS) {
                out.push(format!("  ✓ {fact}"));
            }
        }

        if !self.disproven_assumptions.is_empty() {
            out.push("**Disproven assumptions:**".to_owned());
            for a in last_n(&self.disproven_assumptions, DESCRIBE_DISPROVEN) {
                out.push(format!("  ✗ {a}"));
            }
        }

        out.join("\n")
    }
}

fn push_unique(list: &mut Vec<String>, item: String) -> bool {
    if list.contains(&item) {
        return false;
    }
    list.push(item);
    true
}

fn last_n(items: &[String], n: usize) -> &[String] {
    &items[items.len().saturating_sub(n)..]
}

fn truncated_list(items: &[String], max: usize) -> String {
    let shown = items.iter().take(max).map(String::as_str).collect::<Vec<_>>().join(", ");
    if items.len() > max {
        format!("{shown} (+{} more)", items.len() - max)
    } else {
        shown
    }
}

fn qualified_table(args: &Value) -> Option<String> {
    let table = string_arg(args, &["table", "table_name"])?;
    if table.contains('.') {
        return Some(table.to_owned());
    }
    let schema = string_arg(args, &["schema", "schema_name"]).unwrap_or("public");
    Some(format!("{schema}.{table}"))
}

/// First value of a result row: by the first reported column, else the sole field.
fn first_value<'a>(row: &'a Value, columns: Option<&Vec<Value>>) -> Option<&'a Value> {
    match row {
        Value::Object(map) => {
            if let Some(first) = columns.and_then(|c| c.first()).and_then(Value::as_str) {
                if let Some(v) = map.get(first) {
                    return Some(v);
                }
            }
            if map.len() == 1 { map.values().next() } else { None }
        }
        Value::Array(items) => items.first(),
        _ => None,
    }
}

fn as_count(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
