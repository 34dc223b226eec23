use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use super::sql_guard;
use super::{NOT_CONNECTED, ToolGateway, ToolName, error_payload, string_arg};

/// Gateway used before `/db` has connected anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedGateway;

#[async_trait::async_trait]
impl ToolGateway for DisconnectedGateway {
    async fn invoke(&self, _name: ToolName, _arguments: &Value) -> Value {
        error_payload(NOT_CONNECTED, "connection_error")
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn describe_target(&self) -> String {
        "not connected".into()
    }
}

/// In-memory gateway with canned results per tool.
///
/// Results queue per tool; the last queued result keeps answering once the
/// rest are used up. Every call is logged.
#[derive(Debug, Default)]
pub struct StaticGateway {
    results: Mutex<HashMap<ToolName, VecDeque<Value>>>,
    calls: Mutex<Vec<(ToolName, Value)>>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `result` for the next call to `tool`.
    pub fn with(self, tool: ToolName, result: Value) -> Self {
        if let Ok(mut r) = self.results.lock() {
            r.entry(tool).or_default().push_back(result);
        }
        self
    }

    pub fn calls(&self) -> Vec<(ToolName, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, tool: ToolName) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|(t, _)| *t == tool).count())
            .unwrap_or(0)
    }

    fn next_result(&self, tool: ToolName) -> Option<Value> {
        let mut results = self.results.lock().ok()?;
        let queue = results.get_mut(&tool)?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }
}

#[async_trait::async_trait]
impl ToolGateway for StaticGateway {
    async fn invoke(&self, name: ToolName, arguments: &Value) -> Value {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name, arguments.clone()));
        }
        if let Some(result) = self.next_result(name) {
            return result;
        }
        match name {
            ToolName::ValidateSql => {
                let sql = string_arg(arguments, &["sql", "query"]).unwrap_or_default();
                sql_guard::check(sql).to_payload()
            }
            _ => error_payload(&format!("no canned result for {name}"), "not_found"),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn describe_target(&self) -> String {
        "static".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::is_error_payload;
    use serde_json::json;

    #[tokio::test]
    async fn disconnected_always_errors() {
        let g = DisconnectedGateway;
        let r = g.invoke(ToolName::ListSchemas, &json!({})).await;
        assert_eq!(r["error"], NOT_CONNECTED);
        assert!(!g.is_connected());
    }

    #[tokio::test]
    async fn static_results_queue_then_stick() {
        let g = StaticGateway::new()
            .with(ToolName::ListSchemas, json!({"schemas": ["a"]}))
            .with(ToolName::ListSchemas, json!({"schemas": ["b"]}));
        assert_eq!(g.invoke(ToolName::ListSchemas, &json!({})).await["schemas"][0], "a");
        assert_eq!(g.invoke(ToolName::ListSchemas, &json!({})).await["schemas"][0], "b");
        assert_eq!(g.invoke(ToolName::ListSchemas, &json!({})).await["schemas"][0], "b");
        assert_eq!(g.call_count(ToolName::ListSchemas), 3);
    }

    #[tokio::test]
    async fn unconfigured_tools_fail_except_validation() {
        let g = StaticGateway::new();
        assert!(is_error_payload(&g.invoke(ToolName::ListTables, &json!({})).await));
        let v = g.invoke(ToolName::ValidateSql, &json!({"sql": "DROP TABLE users"})).await;
        assert_eq!(v["valid"], false);
        assert_eq!(g.calls().len(), 2);
    }
}
