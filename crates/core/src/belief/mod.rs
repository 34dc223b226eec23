mod sql_heuristic;
mod store;

pub use sql_heuristic::{extract_table_name_heuristic, is_count_query};
pub use store::{BeliefStore, ColumnInfo, RelationshipInfo, Row};
