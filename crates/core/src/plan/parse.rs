//! Parsing of the model's JSON replies for planning and reflection.
//!
//! Every parse is fallible and returns `ParseFailure`; callers own the
//! deterministic fallback.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseFailure {
    #[error("model output is empty")]
    Empty,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unexpected shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedItem {
    pub description: String,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlan {
    pub items: Vec<ProposedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemVerdict {
    Completed,
    Blocked,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub status: ItemVerdict,
    pub observation: String,
    pub result: Option<String>,
    pub blocked_reason: Option<String>,
    pub new_todos: Vec<ProposedItem>,
    pub goal_satisfied: bool,
    pub next_action: Option<String>,
}

/// Accepts a bare array of items or an object with `todos`/`plan`/`items`.
/// Items may be strings or `{description, priority}`; priorities are clamped
/// to at least 1 and default to position. At most `max_items` are kept.
pub fn parse_plan(raw: &str, max_items: usize) -> Result<ParsedPlan, ParseFailure> {
    let value = parse_json(raw)?;
    let list = match &value {
        Value::Array(items) => items,
        Value::Object(map) => ["todos", "plan", "items"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .ok_or_else(|| ParseFailure::Shape("no todos array".into()))?,
        _ => return Err(ParseFailure::Shape("expected array or object".into())),
    };
    let items = proposed_items(list);
    if items.is_empty() {
        return Err(ParseFailure::Shape("plan has no usable items".into()));
    }
    Ok(ParsedPlan { items: items.into_iter().take(max_items.max(1)).collect() })
}

pub fn parse_reflection(raw: &str) -> Result<Reflection, ParseFailure> {
    let value = parse_json(raw)?;
    let Value::Object(map) = &value else {
        return Err(ParseFailure::Shape("expected object".into()));
    };
    let status = match map.get("status").and_then(Value::as_str).map(str::trim) {
        Some("completed") | Some("complete") | Some("done") => ItemVerdict::Completed,
        Some("blocked") | Some("failed") => ItemVerdict::Blocked,
        Some("continue") | Some("in_progress") => ItemVerdict::Continue,
        Some(other) => return Err(ParseFailure::Shape(format!("unknown status '{other}'"))),
        None => return Err(ParseFailure::Shape("missing status".into())),
    };
    let text = |k: &str| {
        map.get(k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    Ok(Reflection {
        status,
        observation: text("observation").unwrap_or_default(),
        result: text("result"),
        blocked_reason: text("blocked_reason"),
        new_todos: map
            .get("new_todos")
            .and_then(Value::as_array)
            .map(|l| proposed_items(l))
            .unwrap_or_default(),
        goal_satisfied: map.get("goal_satisfied").and_then(Value::as_bool).unwrap_or(false),
        next_action: text("next_action"),
    })
}

fn proposed_items(list: &[Value]) -> Vec<ProposedItem> {
    list.iter()
        .enumerate()
        .filter_map(|(pos, v)| {
            let (description, priority) = match v {
                Value::String(s) => (s.trim().to_owned(), None),
                Value::Object(m) => (
                    m.get("description")
                        .or_else(|| m.get("task"))
                        .and_then(Value::as_str)?
                        .trim()
                        .to_owned(),
                    m.get("priority").and_then(Value::as_u64),
                ),
                _ => return None,
            };
            if description.is_empty() {
                return None;
            }
            let priority = priority.map(|p| p.min(u32::MAX as u64) as u32).unwrap_or(pos as u32 + 1);
            Some(ProposedItem { description, priority: priority.max(1) })
        })
        .collect()
}

/// Strip a code fence or cut the outermost `{...}` / `[...]`, then parse.
fn parse_json(raw: &str) -> Result<Value, ParseFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseFailure::Empty);
    }

    let candidate = if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        let end = lines
            .iter()
            .skip(1)
            .rposition(|l| l.trim_start().starts_with("```"))
            .map(|p| p + 1)
            .unwrap_or(lines.len());
        lines[1..end.max(1)].join("\n")
    } else {
        let obj = trimmed.find('{').zip(trimmed.rfind('}'));
        let arr = trimmed.find('[').zip(trimmed.rfind(']'));
        match (obj, arr) {
            (Some((os, oe)), Some((as_, ae))) if as_ < os => trimmed[as_..=ae.max(oe)].to_owned(),
            (Some((os, oe)), _) if os < oe => trimmed[os..=oe].to_owned(),
            (None, Some((as_, ae))) if as_ < ae => trimmed[as_..=ae].to_owned(),
            _ => trimmed.to_owned(),
        }
    };

    serde_json::from_str(&candidate).map_err(|e| ParseFailure::InvalidJson(e.to_string()))
}
