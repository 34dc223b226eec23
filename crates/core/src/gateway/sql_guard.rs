//! Read-only safety check applied before any SQL reaches the database.

use serde_json::{Value, json};

pub const DEFAULT_ROW_LIMIT: u32 = 100;

const FORBIDDEN: [&str; 9] = [
    "DELETE", "DROP", "TRUNCATE", "UPDATE", "INSERT", "ALTER", "CREATE", "GRANT", "REVOKE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlVerdict {
    Rejected { reason: String },
    /// Allowed, but unbounded; `suggestion` is the statement with a LIMIT.
    NeedsLimit { suggestion: String },
    Ok,
}

impl SqlVerdict {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Payload returned by `validate_sql` when no syntax check is available.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Rejected { reason } => json!({
                "success": false,
                "valid": false,
                "error": reason,
                "error_type": "permission_denied",
            }),
            Self::NeedsLimit { suggestion } => json!({
                "success": true,
                "valid": true,
                "warning": "Query does not have LIMIT clause. Consider adding one.",
                "suggestion": suggestion,
            }),
            Self::Ok => json!({"success": true, "valid": true, "message": "Query passed safety checks"}),
        }
    }
}

/// Forbidden keywords match whole words only, so `created_at` passes.
pub fn check(sql: &str) -> SqlVerdict {
    let words = words_upper(sql);
    if let Some(kw) = FORBIDDEN.iter().find(|kw| words.iter().any(|w| w.as_str() == **kw)) {
        return SqlVerdict::Rejected { reason: format!("Forbidden operation: {kw}") };
    }
    match words.first().map(String::as_str) {
        Some("SELECT") | Some("WITH") => {}
        _ => return SqlVerdict::Rejected { reason: "Only SELECT queries are allowed".into() },
    }
    if has_limit(sql) {
        SqlVerdict::Ok
    } else {
        SqlVerdict::NeedsLimit { suggestion: with_limit(sql, DEFAULT_ROW_LIMIT) }
    }
}

pub fn has_limit(sql: &str) -> bool {
    words_upper(sql).iter().any(|w| w == "LIMIT")
}

/// `sql` with `LIMIT n` appended unless it already has one.
pub fn with_limit(sql: &str, limit: u32) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if has_limit(trimmed) {
        trimmed.to_owned()
    } else {
        format!("{trimmed} LIMIT {limit}")
    }
}

fn words_upper(sql: &str) -> Vec<String> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}
