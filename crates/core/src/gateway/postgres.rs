use std::str::FromStr;
use std::time::Duration;

use serde_json::{Value, json};
use sqlx::{Executor, PgPool, Statement};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::rows::{column_names, row_to_json};
use super::sql_guard::{self, SqlVerdict};
use super::{GatewayError, ToolGateway, ToolName, string_arg};
use crate::config::ScoutCfg;

const HIDDEN_SCHEMAS: &str = "('pg_catalog', 'information_schema', 'pg_toast')";
const INSPECT_SAMPLE_ROWS: u32 = 3;

/// Live PostgreSQL gateway backed by a small sqlx pool.
pub struct PgGateway {
    pool: PgPool,
    target: String,
    version: String,
    row_limit: u32,
    statement_timeout_ms: u64,
}

impl PgGateway {
    /// Connect and fetch the server version, giving up after
    /// `db_connect_timeout_secs`.
    pub async fn connect(url: &str, cfg: &ScoutCfg) -> Result<Self, GatewayError> {
        let opts = PgConnectOptions::from_str(url).map_err(|e| GatewayError::Connect(e.to_string()))?;
        let target = format!(
            "{}@{}:{}/{}",
            opts.get_username(),
            opts.get_host(),
            opts.get_port(),
            opts.get_database().unwrap_or_default()
        );

        let secs = cfg.db_connect_timeout_secs;
        let pool = tokio::time::timeout(
            Duration::from_secs(secs),
            PgPoolOptions::new().max_connections(4).connect_with(opts),
        )
        .await
        .map_err(|_| GatewayError::Timeout(secs))?
        .map_err(|e| GatewayError::Connect(e.to_string()))?;

        let version: String = sqlx::query_scalar("SELECT version()").fetch_one(&pool).await?;
        tracing::info!(target_db = %target, %version, "database connected");

        Ok(Self {
            pool,
            target,
            version,
            row_limit: cfg.query_row_limit,
            statement_timeout_ms: cfg.statement_timeout_ms,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.version
    }

    async fn list_schemas(&self) -> Result<Value, GatewayError> {
        let sql = format!(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name NOT IN {HIDDEN_SCHEMAS} ORDER BY schema_name"
        );
        let schemas: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(json!({"success": true, "count": schemas.len(), "schemas": schemas}))
    }

    async fn list_tables(&self, args: &Value) -> Result<Value, GatewayError> {
        let schema = string_arg(args, &["schema", "schema_name"]).unwrap_or("public");
        let tables: Vec<(String, i64)> = sqlx::query_as(
            "SELECT t.table_name::text, \
                    (SELECT COUNT(*) FROM information_schema.columns c \
                     WHERE c.table_schema = t.table_schema AND c.table_name = t.table_name) \
             FROM information_schema.tables t \
             WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE' \
             ORDER BY t.table_name",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;

        let mut list = Vec::with_capacity(tables.len());
        for (name, column_count) in tables {
            let count_sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, &name));
            let row_count: i64 = match sqlx::query_scalar(&count_sql).fetch_one(&self.pool).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(table = %name, error = %e, "row count failed");
                    0
                }
            };
            list.push(json!({
                "name": name,
                "schema": schema,
                "row_count": row_count,
                "column_count": column_count,
            }));
        }
        Ok(json!({"success": true, "schema": schema, "count": list.len(), "tables": list}))
    }

    async fn inspect_schema(&self, args: &Value) -> Result<Value, GatewayError> {
        let table = string_arg(args, &["table", "table_name"]).ok_or(GatewayError::MissingArgument("table_name"))?;
        let schema = string_arg(args, &["schema", "schema_name"]).unwrap_or("public");

        let columns: Vec<(String, String, Option<i32>, String, Option<String>, i32)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text, character_maximum_length::int4, \
                    is_nullable::text, column_default::text, ordinal_position::int4 \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Err(GatewayError::NotFound(format!("Table '{schema}.{table}' not found")));
        }
        let regclass = qualified(schema, table);

        let primary_keys: Vec<String> = sqlx::query_scalar(
            "SELECT a.attname::text FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = $1::regclass AND i.indisprimary",
        )
        .bind(&regclass)
        .fetch_all(&self.pool)
        .await?;

        let foreign_keys: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT kcu.column_name::text, ccu.table_schema::text, ccu.table_name::text, ccu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let indexes: Vec<(String, String, bool)> = sqlx::query_as(
            "SELECT i.relname::text, a.attname::text, ix.indisunique \
             FROM pg_class t \
             JOIN pg_index ix ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             WHERE n.nspname = $1 AND t.relname = $2 AND t.relkind = 'r'",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let sample_sql = format!("SELECT * FROM {regclass} LIMIT {INSPECT_SAMPLE_ROWS}");
        let sample: Vec<Value> = sqlx::query(&sample_sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_json)
            .collect();

        let columns: Vec<Value> = columns
            .into_iter()
            .map(|(name, data_type, max_length, nullable, default, position)| {
                json!({
                    "name": name,
                    "type": data_type,
                    "max_length": max_length,
                    "nullable": nullable == "YES",
                    "default": default,
                    "position": position,
                    "is_primary_key": primary_keys.contains(&name),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "table": table,
            "schema": schema,
            "columns": columns,
            "primary_keys": primary_keys,
            "foreign_keys": foreign_keys.into_iter().map(|(column, s, t, c)| json!({
                "column": column,
                "references_schema": s,
                "references_table": t,
                "references_column": c,
            })).collect::<Vec<_>>(),
            "indexes": indexes.into_iter().map(|(name, column, unique)| json!({
                "name": name,
                "column": column,
                "unique": unique,
            })).collect::<Vec<_>>(),
            "sample_data": sample,
        }))
    }

    async fn get_relationships(&self, args: &Value) -> Result<Value, GatewayError> {
        let table = string_arg(args, &["table", "table_name"]).ok_or(GatewayError::MissingArgument("table_name"))?;
        let schema = string_arg(args, &["schema", "schema_name"]).unwrap_or("public");

        let outgoing: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT kcu.column_name::text, ccu.table_schema::text, ccu.table_name::text, \
                    ccu.column_name::text, rc.update_rule::text, rc.delete_rule::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name \
             JOIN information_schema.constraint_column_usage ccu ON ccu.constraint_name = tc.constraint_name \
             JOIN information_schema.referential_constraints rc ON tc.constraint_name = rc.constraint_name \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let incoming: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT kcu.table_schema::text, kcu.table_name::text, kcu.column_name::text, ccu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name \
             JOIN information_schema.constraint_column_usage ccu ON ccu.constraint_name = tc.constraint_name \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND ccu.table_schema = $1 AND ccu.table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(json!({
            "success": true,
            "table": table,
            "schema": schema,
            "outgoing_relationships": outgoing.into_iter().map(|(col, fs, ft, fc, upd, del)| json!({
                "column_name": col,
                "foreign_table_schema": fs,
                "foreign_table_name": ft,
                "foreign_column_name": fc,
                "update_rule": upd,
                "delete_rule": del,
            })).collect::<Vec<_>>(),
            "incoming_relationships": incoming.into_iter().map(|(s, t, c, rc)| json!({
                "referencing_schema": s,
                "referencing_table": t,
                "referencing_column": c,
                "referenced_column": rc,
            })).collect::<Vec<_>>(),
        }))
    }

    async fn validate_sql(&self, args: &Value) -> Result<Value, GatewayError> {
        let sql = string_arg(args, &["sql", "query"]).ok_or(GatewayError::MissingArgument("sql"))?;
        let verdict = sql_guard::check(sql);
        if !verdict.is_allowed() {
            return Ok(verdict.to_payload());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        let explained = sqlx::query(&format!("EXPLAIN {}", sql.trim_end_matches(';')))
            .execute(&mut *tx)
            .await;
        tx.rollback().await?;

        let mut payload = match explained {
            Ok(_) => json!({"success": true, "valid": true, "message": "Query syntax is valid"}),
            Err(e) => json!({"success": true, "valid": false, "error": e.to_string(), "error_type": "syntax_error"}),
        };
        if let (SqlVerdict::NeedsLimit { .. }, Value::Object(out), Value::Object(extra)) =
            (&verdict, &mut payload, verdict.to_payload())
        {
            for key in ["warning", "suggestion"] {
                if let Some(v) = extra.get(key) {
                    out.insert(key.to_owned(), v.clone());
                }
            }
        }
        Ok(payload)
    }

    async fn execute_query(&self, args: &Value) -> Result<Value, GatewayError> {
        let sql = string_arg(args, &["sql", "query"]).ok_or(GatewayError::MissingArgument("sql"))?;
        let verdict = sql_guard::check(sql);
        if !verdict.is_allowed() {
            return Ok(verdict.to_payload());
        }
        let bounded = sql_guard::with_limit(sql, self.row_limit);

        match self.run_read_only(&bounded).await {
            Ok((columns, data)) => Ok(query_payload(&bounded, columns, data)),
            Err(e) => Ok(json!({
                "success": false,
                "error": e.to_string(),
                "error_type": "database_error",
                "query": bounded,
            })),
        }
    }

    async fn run_read_only(&self, sql: &str) -> Result<(Vec<String>, Vec<Value>), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", self.statement_timeout_ms))
            .execute(&mut *tx)
            .await?;
        // columns come from the statement so an empty result still names them
        let stmt = (&mut *tx).prepare(sql).await?;
        let columns = column_names(stmt.columns());
        let rows = stmt.query().fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        Ok((columns, rows.iter().map(row_to_json).collect()))
    }
}

fn query_payload(query: &str, columns: Vec<String>, data: Vec<Value>) -> Value {
    json!({
        "success": true,
        "query": query,
        "row_count": data.len(),
        "columns": columns,
        "data": data,
    })
}

#[async_trait::async_trait]
impl ToolGateway for PgGateway {
    async fn invoke(&self, name: ToolName, arguments: &Value) -> Value {
        let result = match name {
            ToolName::ListSchemas => self.list_schemas().await,
            ToolName::ListTables => self.list_tables(arguments).await,
            ToolName::InspectSchema => self.inspect_schema(arguments).await,
            ToolName::GetRelationships => self.get_relationships(arguments).await,
            ToolName::ValidateSql => self.validate_sql(arguments).await,
            ToolName::ExecuteQuery => self.execute_query(arguments).await,
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(tool = %name, error = %e, "gateway call failed");
            e.into_payload()
        })
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    fn describe_target(&self) -> String {
        self.target.clone()
    }
}

/// Double-quoted identifier, embedded quotes doubled.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("public", "Order Items"), "\"public\".\"Order Items\"");
    }

    #[test]
    fn empty_result_keeps_column_names() {
        let payload = query_payload("SELECT id, email FROM users LIMIT 100", vec!["id".into(), "email".into()], Vec::new());
        assert_eq!(payload["row_count"], 0);
        assert_eq!(payload["columns"], json!(["id", "email"]));
        assert_eq!(payload["data"], json!([]));
    }

    #[tokio::test]
    async fn unreachable_database_times_out_or_fails() {
        let cfg = ScoutCfg { db_connect_timeout_secs: 1, ..ScoutCfg::default() };
        let err = PgGateway::connect("postgres://nobody@127.0.0.1:1/none", &cfg).await.err();
        assert!(matches!(err, Some(GatewayError::Connect(_) | GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn malformed_url_is_a_connect_error() {
        let err = PgGateway::connect("not a url", &ScoutCfg::default()).await.err();
        assert!(matches!(err, Some(GatewayError::Connect(_))));
    }
}
