//! PostgreSQL row → JSON conversion, dispatched on the column's type name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value, json};
use sqlx::postgres::{PgColumn, PgRow, Postgres};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

pub(super) fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_owned(), cell_to_json(row, i, col.type_info().name()));
    }
    Value::Object(map)
}

pub(super) fn column_names(columns: &[PgColumn]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_owned()).collect()
}

fn get<'r, T>(row: &'r PgRow, i: usize) -> Option<Option<T>>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(i).ok()
}

fn cell_to_json(row: &PgRow, i: usize, type_name: &str) -> Value {
    let converted = match type_name {
        "INT2" => get::<i16>(row, i).map(|v| json!(v)),
        "INT4" => get::<i32>(row, i).map(|v| json!(v)),
        "INT8" => get::<i64>(row, i).map(|v| json!(v)),
        "FLOAT4" => get::<f32>(row, i).map(|v| json!(v)),
        "FLOAT8" => get::<f64>(row, i).map(|v| json!(v)),
        "NUMERIC" => get::<Decimal>(row, i).map(|v| v.map(decimal_to_json).unwrap_or(Value::Null)),
        "BOOL" => get::<bool>(row, i).map(|v| json!(v)),
        "UUID" => get::<Uuid>(row, i).map(|v| json!(v.map(|u| u.to_string()))),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, i).map(|v| json!(v.map(|t| t.to_rfc3339()))),
        "TIMESTAMP" => get::<NaiveDateTime>(row, i)
            .map(|v| json!(v.map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        "DATE" => get::<NaiveDate>(row, i).map(|v| json!(v.map(|d| d.to_string()))),
        "TIME" => get::<NaiveTime>(row, i).map(|v| json!(v.map(|t| t.to_string()))),
        "JSON" | "JSONB" => get::<Value>(row, i).map(|v| v.unwrap_or(Value::Null)),
        "BYTEA" => get::<Vec<u8>>(row, i).map(|v| v.map(|b| bytes_to_json(&b)).unwrap_or(Value::Null)),
        _ => get::<String>(row, i).map(|v| json!(v)),
    };
    converted.unwrap_or_else(|| json!(format!("<unsupported type {type_name}>")))
}

/// Numbers when they fit an f64, else the exact decimal text.
fn decimal_to_json(d: Decimal) -> Value {
    let text = d.to_string();
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => json!(f),
        _ => Value::String(text),
    }
}

fn bytes_to_json(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_owned()),
        Err(_) => Value::String(format!("<binary data: {} bytes>", bytes.len())),
    }
}
