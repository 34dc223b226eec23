//! Prompt text and the fixed plan items used as fallbacks.
//!
//! Each instruction opens with a `## Phase: <name>` line so one conversation
//! can be told apart by phase in logs and scripted providers.

use crate::plan::PlanQueue;

pub const PLANNING_MARKER: &str = "## Phase: planning";
pub const ACTING_MARKER: &str = "## Phase: acting";
pub const REFLECTING_MARKER: &str = "## Phase: reflecting";
pub const SYNTHESIZING_MARKER: &str = "## Phase: synthesizing";

pub const SYSTEM_PROMPT: &str = "You are a careful PostgreSQL database explorer. You answer questions about a \
database by gathering evidence with tools, never by guessing.

Tools:
- list_schemas(): all user schemas
- list_tables(schema_name): tables in a schema with row and column counts
- inspect_schema(table_name, schema_name): columns, keys, indexes and sample rows
- get_relationships(table_name, schema_name): foreign keys in and out
- validate_sql(sql): safety and syntax check without running the query
- execute_query(sql): run one SELECT; the user must approve it first

Rules:
1. Verify that schemas, tables and columns exist before using them.
2. Only SELECT (or WITH ... SELECT) statements. Never modify data.
3. When a query returns no rows, investigate before concluding anything.
4. Report numbers exactly as the tools returned them.";

pub const FALLBACK_PLAN: [&str; 4] = [
    "Identify tables relevant to the question",
    "Inspect the columns of the candidate tables",
    "Query the data needed to answer the question",
    "Verify the result and answer the question",
];

pub const FALLBACK_ITEM: &str = "verify if goal can be satisfied with current data";

pub const ALTERNATIVE_APPROACH: &str =
    "Find an alternative approach that does not need the rejected query";

pub const REJECTION_MESSAGE: &str =
    "Query rejected by user. Try a different approach or ask the user for guidance.";

/// The three investigative items queued after an empty or failed observation.
pub fn investigation_items(table: Option<&str>) -> [String; 3] {
    let target = table.map(|t| format!(" {t}")).unwrap_or_else(|| " the queried table".to_owned());
    [
        "Investigate why the query returned no rows".to_owned(),
        format!("Check the row count of{target}"),
        format!("Sample rows from{target} without filters"),
    ]
}

pub fn planning(goal: &str, beliefs: &str, min_items: usize, max_items: usize) -> String {
    format!(
        "{PLANNING_MARKER}\n\
         Goal: {goal}\n\n\
         ## Verified knowledge\n{beliefs}\n\n\
         Break the goal into {min_items} to {max_items} concrete steps. Start with discovery \
         steps for anything not yet verified. Reply with JSON only:\n\
         {{\"todos\": [{{\"description\": \"...\", \"priority\": 1}}]}}\n\
         Priority 1 is most urgent."
    )
}

pub fn acting(goal: &str, item_id: &str, item: &str, beliefs: &str, plan: &PlanQueue) -> String {
    format!(
        "{ACTING_MARKER}\n\
         Goal: {goal}\n\
         Current task ({item_id}): {item}\n\n\
         ## Verified knowledge\n{beliefs}\n\n\
         ## Plan\n{}\n\n\
         Call the tools needed for the current task. If the verified knowledge already \
         settles it, reply in plain text with the finding instead of calling a tool.",
        plan.render()
    )
}

pub fn reflecting(
    goal: &str,
    item: Option<&str>,
    tool: &str,
    arguments: &str,
    payload: &str,
    beliefs: &str,
    plan: &PlanQueue,
) -> String {
    format!(
        "{REFLECTING_MARKER}\n\
         Goal: {goal}\n\
         Current task: {}\n\n\
         Tool `{tool}` was called with {arguments} and returned exactly:\n\
         ```json\n{payload}\n```\n\n\
         ## Verified knowledge\n{beliefs}\n\n\
         ## Plan\n{}\n\n\
         Judge the current task from the returned data above, quoting actual values. \
         An empty result or an error does not answer the goal. Reply with JSON only:\n\
         {{\"status\": \"completed|blocked|continue\", \"observation\": \"...\", \
         \"result\": \"...\", \"blocked_reason\": null, \
         \"new_todos\": [{{\"description\": \"...\", \"priority\": 2}}], \
         \"goal_satisfied\": false, \"next_action\": \"...\"}}",
        item.unwrap_or("(none)"),
        plan.render()
    )
}

pub fn synthesizing(goal: &str, beliefs: &str, completed: &[(&str, &str)]) -> String {
    let results = if completed.is_empty() {
        "(no completed tasks)".to_owned()
    } else {
        completed
            .iter()
            .map(|(d, r)| format!("- {d}: {r}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{SYNTHESIZING_MARKER}\n\
         Question: {goal}\n\n\
         ## Verified knowledge\n{beliefs}\n\n\
         ## Completed tasks\n{results}\n\n\
         Answer the question for the user using only the verified knowledge and completed \
         task results above. State numbers exactly as recorded. If the data is not enough, \
         say what was found and what is missing."
    )
}

/// First `max` chars of `s`, with `...` when cut.
pub fn preview(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_carry_phase_markers() {
        let plan = PlanQueue::new();
        assert!(planning("g", "b", 3, 7).starts_with(PLANNING_MARKER));
        assert!(acting("g", "todo-1", "x", "b", &plan).starts_with(ACTING_MARKER));
        assert!(reflecting("g", None, "list_schemas", "{}", "{}", "b", &plan).starts_with(REFLECTING_MARKER));
        assert!(synthesizing("g", "b", &[]).starts_with(SYNTHESIZING_MARKER));
    }

    #[test]
    fn reflection_quotes_payload_verbatim() {
        let payload = r#"{"data":[{"count":150}],"row_count":1}"#;
        let text = reflecting("how many users", Some("count users"), "execute_query", "{}", payload, "", &PlanQueue::new());
        assert!(text.contains(payload));
    }

    #[test]
    fn investigation_names_table() {
        let items = investigation_items(Some("users"));
        assert_eq!(items[1], "Check the row count of users");
        assert_eq!(investigation_items(None)[2], "Sample rows from the queried table without filters");
    }

    #[test]
    fn preview_cuts_on_chars() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("ok", 5), "ok");
    }
}
