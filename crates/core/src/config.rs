use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All loop and gateway parameters. Built from defaults, overlaid with
/// `SCOUT_<KEY>` environment variables at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutCfg {
    // loop budget
    pub max_iterations: u32,
    pub max_consecutive_model_failures: u32,

    // planning
    pub plan_min_items: usize,
    pub plan_max_items: usize,

    // model calls
    pub act_max_tokens: u32,
    pub json_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    pub temperature: f32,
    pub reflection_payload_max_chars: usize,

    // database
    pub query_row_limit: u32,
    pub statement_timeout_ms: u64,
    pub db_connect_timeout_secs: u64,

    // session
    pub carry_beliefs: bool,
}

impl Default for ScoutCfg {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_consecutive_model_failures: 3,
            plan_min_items: 3,
            plan_max_items: 7,
            act_max_tokens: 2048,
            json_max_tokens: 1024,
            synthesis_max_tokens: 2048,
            temperature: 0.0,
            reflection_payload_max_chars: 16_000,
            query_row_limit: 100,
            statement_timeout_ms: 30_000,
            db_connect_timeout_secs: 3,
            carry_beliefs: false,
        }
    }
}

impl ScoutCfg {
    /// Overlay `SCOUT_<UPPERCASE_KEY>` variables on the defaults.
    pub fn from_env() -> Self {
        let keys: Vec<String> = Self::default()
            .to_entries()
            .into_iter()
            .map(|(k, _, _)| k.to_owned())
            .collect();
        let map: HashMap<String, String> = keys
            .into_iter()
            .filter_map(|k| {
                let var = format!("SCOUT_{}", k.to_uppercase());
                std::env::var(var).ok().map(|v| (k, v))
            })
            .collect();
        Self::from_map(&map)
    }

    /// Unknown keys are ignored; unparsable values keep the default.
    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            max_iterations: get_or(m, "max_iterations", d.max_iterations),
            max_consecutive_model_failures: get_or(m, "max_consecutive_model_failures", d.max_consecutive_model_failures),
            plan_min_items: get_or(m, "plan_min_items", d.plan_min_items),
            plan_max_items: get_or(m, "plan_max_items", d.plan_max_items),
            act_max_tokens: get_or(m, "act_max_tokens", d.act_max_tokens),
            json_max_tokens: get_or(m, "json_max_tokens", d.json_max_tokens),
            synthesis_max_tokens: get_or(m, "synthesis_max_tokens", d.synthesis_max_tokens),
            temperature: get_or(m, "temperature", d.temperature),
            reflection_payload_max_chars: get_or(m, "reflection_payload_max_chars", d.reflection_payload_max_chars),
            query_row_limit: get_or(m, "query_row_limit", d.query_row_limit),
            statement_timeout_ms: get_or(m, "statement_timeout_ms", d.statement_timeout_ms),
            db_connect_timeout_secs: get_or(m, "db_connect_timeout_secs", d.db_connect_timeout_secs),
            carry_beliefs: get_or(m, "carry_beliefs", d.carry_beliefs),
        }
    }

    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("max_iterations", self.max_iterations.to_string(), "Loop passes before forced synthesis"),
            ("max_consecutive_model_failures", self.max_consecutive_model_failures.to_string(), "Failed model calls in a row before forced synthesis"),
            ("plan_min_items", self.plan_min_items.to_string(), "Fewest plan items requested"),
            ("plan_max_items", self.plan_max_items.to_string(), "Most plan items accepted"),
            ("act_max_tokens", self.act_max_tokens.to_string(), "Token limit for acting calls"),
            ("json_max_tokens", self.json_max_tokens.to_string(), "Token limit for planning and reflection calls"),
            ("synthesis_max_tokens", self.synthesis_max_tokens.to_string(), "Token limit for the final answer"),
            ("temperature", self.temperature.to_string(), "Sampling temperature"),
            ("reflection_payload_max_chars", self.reflection_payload_max_chars.to_string(), "Tool result chars quoted in reflection"),
            ("query_row_limit", self.query_row_limit.to_string(), "LIMIT appended to unbounded queries"),
            ("statement_timeout_ms", self.statement_timeout_ms.to_string(), "Per-query statement timeout ms"),
            ("db_connect_timeout_secs", self.db_connect_timeout_secs.to_string(), "Database connect timeout seconds"),
            ("carry_beliefs", self.carry_beliefs.to_string(), "Keep beliefs between goals"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
