//! Table attribution for executed SQL.
//!
//! Takes the first whitespace-delimited token after the first `from`. Aliases
//! and joins are not resolved: a joined query is attributed to its first table.

/// First token after the first case-insensitive `from `, trailing `;` `,` `)`
/// trimmed, original case kept. `None` when there is no such token.
pub fn extract_table_name_heuristic(sql: &str) -> Option<String> {
    let lower = sql.to_ascii_lowercase();
    let start = lower.find("from ")? + "from ".len();
    let token = sql[start..].split_whitespace().next()?;
    let token = token.trim_end_matches([';', ',', ')']);
    (!token.is_empty()).then(|| token.to_owned())
}

/// True when the statement contains a counting aggregate: the word `count`
/// followed, after optional whitespace, by `(`.
pub fn is_count_query(sql: &str) -> bool {
    let lower = sql.to_ascii_lowercase();
    lower.match_indices("count").any(|(i, _)| {
        let word_start = lower[..i].chars().next_back().is_none_or(|c| !c.is_alphanumeric() && c != '_');
        word_start && lower[i + "count".len()..].trim_start().starts_with('(')
    })
}
