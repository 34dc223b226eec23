//! Loop events as transcript entries.

use scout_core::agent::LoopEvent;
use scout_core::agent::prompts::preview;
use scout_core::plan::{ItemVerdict, PlanItem, PlanStatus};
use serde_json::Value;

const PLAN_LINES: usize = 5;
const LIST_ITEMS: usize = 5;
const ARG_CHARS: usize = 60;
const ROW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Dimmed progress line.
    Trace,
    /// Plan snapshot; a newer one replaces the previous in place.
    Plan,
    Answer,
    Alert,
    Approval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub kind: EntryKind,
    pub text: String,
}

impl Entry {
    fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }
}

pub fn render(event: &LoopEvent) -> Option<Entry> {
    let entry = match event {
        LoopEvent::PhaseChange { to, iteration, item, .. } => {
            let mut line = format!("── {to}");
            if *iteration > 0 {
                line.push_str(&format!(" · step {iteration}"));
            }
            if let Some(item) = item {
                line.push_str(&format!(" · {item}"));
            }
            Entry::new(EntryKind::Trace, line)
        }
        LoopEvent::ToolCall { tool, arguments, .. } => {
            Entry::new(EntryKind::Trace, format!("→ {tool}({})", abbreviate_args(arguments)))
        }
        LoopEvent::ToolResult { result, .. } => Entry::new(EntryKind::Trace, summarize_result(result)),
        LoopEvent::BeliefUpdate { summary } => {
            let latest = summary.lines().rev().find_map(|l| l.trim().strip_prefix("✓ "));
            Entry::new(EntryKind::Trace, format!("  beliefs: {}", latest.unwrap_or("updated")))
        }
        LoopEvent::PlanUpdate { items } => {
            if items.is_empty() {
                return None;
            }
            Entry::new(EntryKind::Plan, render_plan(items))
        }
        LoopEvent::Reflection { reflection, fallback, .. } => {
            let status = match reflection.status {
                ItemVerdict::Completed => "completed",
                ItemVerdict::Blocked => "blocked",
                ItemVerdict::Continue => "continue",
            };
            let mut line = format!("↺ {status}: {}", preview(&reflection.observation, ROW_CHARS));
            if !reflection.new_todos.is_empty() {
                line.push_str(&format!(" (+{} todo)", reflection.new_todos.len()));
            }
            if *fallback {
                line.push_str(" [fallback]");
            }
            Entry::new(EntryKind::Trace, line)
        }
        LoopEvent::ApprovalNeeded { sql, .. } => Entry::new(
            EntryKind::Approval,
            format!("**Run this query?**\n\n```sql\n{sql}\n```\n\nPress `y` to run it or `n` to reject."),
        ),
        LoopEvent::FinalAnswer { answer } => Entry::new(EntryKind::Answer, answer.clone()),
        LoopEvent::Error { kind, message } => Entry::new(EntryKind::Alert, format!("⚠ {kind:?}: {message}")),
    };
    Some(entry)
}

fn status_icon(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Pending => "○",
        PlanStatus::InProgress => "◐",
        PlanStatus::Completed => "●",
        PlanStatus::Blocked => "✗",
        PlanStatus::Cancelled => "–",
    }
}

fn render_plan(items: &[PlanItem]) -> String {
    let done = items.iter().filter(|i| i.status == PlanStatus::Completed).count();
    let mut out = format!("TODO {done}/{}", items.len());
    for item in items.iter().take(PLAN_LINES) {
        out.push_str(&format!("\n  {} {}", status_icon(item.status), item.description));
    }
    if items.len() > PLAN_LINES {
        out.push_str(&format!("\n  … {} more", items.len() - PLAN_LINES));
    }
    out
}

fn abbreviate_args(arguments: &Value) -> String {
    let Some(map) = arguments.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{k}={}", preview(&v, ARG_CHARS))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn names(list: &[Value]) -> String {
    let shown: Vec<&str> = list
        .iter()
        .take(LIST_ITEMS)
        .filter_map(|v| v.get("name").and_then(Value::as_str).or_else(|| v.as_str()))
        .collect();
    let mut out = shown.join(", ");
    if list.len() > LIST_ITEMS {
        out.push_str(", …");
    }
    out
}

/// One-line preview of a tool payload.
pub fn summarize_result(result: &Value) -> String {
    let array = |key: &str| result.get(key).and_then(Value::as_array);

    if let Some(err) = result.get("error").and_then(Value::as_str) {
        return format!("  ✗ {}", preview(err, ROW_CHARS));
    }
    if result.get("skipped").and_then(Value::as_bool) == Some(true) {
        return "  skipped".to_owned();
    }
    if let Some(schemas) = array("schemas") {
        return format!("  ✓ {} schemas: {}", schemas.len(), names(schemas));
    }
    if let Some(tables) = array("tables") {
        return format!("  ✓ {} tables: {}", tables.len(), names(tables));
    }
    if let Some(columns) = array("columns").filter(|_| result.get("data").is_none()) {
        return format!("  ✓ {} columns: {}", columns.len(), names(columns));
    }
    if result.get("outgoing_relationships").is_some() || result.get("incoming_relationships").is_some() {
        let count = |k: &str| array(k).map_or(0, Vec::len);
        return format!(
            "  ✓ {} outgoing, {} incoming relationships",
            count("outgoing_relationships"),
            count("incoming_relationships")
        );
    }
    if let Some(valid) = result.get("valid").and_then(Value::as_bool) {
        let mut line = if valid { "  ✓ valid".to_owned() } else { "  ✗ invalid".to_owned() };
        if let Some(w) = result.get("warning").and_then(Value::as_str) {
            line.push_str(&format!(" ({w})"));
        }
        return line;
    }
    if let Some(rows) = array("data") {
        let count = result.get("row_count").and_then(Value::as_u64).unwrap_or(rows.len() as u64);
        let mut line = format!("  ✓ {count} rows");
        if let Some(first) = rows.first() {
            line.push_str(&format!(": {}", preview(&first.to_string(), ROW_CHARS)));
        }
        return line;
    }
    format!("  {}", preview(&result.to_string(), ROW_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::agent::{ErrorKind, LoopPhase};
    use serde_json::json;

    #[test]
    fn tool_results_are_summarized() {
        assert_eq!(summarize_result(&json!({"schemas": ["public", "sales"]})), "  ✓ 2 schemas: public, sales");
        assert_eq!(
            summarize_result(&json!({"tables": [{"name": "users", "row_count": 3}]})),
            "  ✓ 1 tables: users"
        );
        assert_eq!(
            summarize_result(&json!({"columns": ["count"], "data": [{"count": 150}], "row_count": 1})),
            "  ✓ 1 rows: {\"count\":150}"
        );
        assert_eq!(summarize_result(&json!({"success": false, "error": "boom"})), "  ✗ boom");
        assert_eq!(summarize_result(&json!({"valid": true, "warning": "no LIMIT"})), "  ✓ valid (no LIMIT)");
    }

    #[test]
    fn plan_shows_first_items_with_icons() {
        let items: Vec<PlanItem> = (1..=7)
            .map(|n| PlanItem {
                id: format!("todo-{n}"),
                description: format!("step {n}"),
                priority: n,
                status: if n == 1 { PlanStatus::Completed } else { PlanStatus::Pending },
                result: None,
                blocked_reason: None,
            })
            .collect();
        let entry = render(&LoopEvent::PlanUpdate { items }).unwrap();
        assert_eq!(entry.kind, EntryKind::Plan);
        assert!(entry.text.starts_with("TODO 1/7\n  ● step 1\n  ○ step 2"));
        assert!(entry.text.ends_with("… 2 more"));
    }

    #[test]
    fn phase_and_error_lines() {
        let phase = render(&LoopEvent::PhaseChange {
            from: Some(LoopPhase::Selecting),
            to: LoopPhase::Acting,
            iteration: 2,
            item: Some("Count users".into()),
        })
        .unwrap();
        assert_eq!(phase.text, format!("── {} · step 2 · Count users", LoopPhase::Acting));

        let err = render(&LoopEvent::Error { kind: ErrorKind::BudgetExhausted, message: "out of steps".into() }).unwrap();
        assert_eq!(err.kind, EntryKind::Alert);
        assert!(err.text.contains("out of steps"));
    }

    #[test]
    fn arguments_are_abbreviated() {
        let long = "x".repeat(100);
        let text = abbreviate_args(&json!({"sql": long}));
        assert!(text.starts_with("sql=xxx"));
        assert!(text.ends_with("..."));
    }
}
