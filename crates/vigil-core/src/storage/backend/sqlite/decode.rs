//! Value conversion between JSON records and SQLite
//!
//! Columns declared `JSON` (or `JSONB`) hold the JSON encoding of whatever
//! value was written and are parsed back on read. Every other text column
//! returns its contents verbatim, even when they happen to look like JSON.

use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use std::collections::HashSet;

use super::errors::map_sqlite_error;
use crate::error::StorageResult;
use crate::storage::backend::sql::BoundParam;
use crate::storage::backend::types::Record;

pub(super) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Names of the columns of one table declared as JSON
pub(super) type JsonColumns = HashSet<String>;

pub(super) fn is_json_declared(declared: &str) -> bool {
    matches!(
        declared.trim().to_ascii_uppercase().as_str(),
        "JSON" | "JSONB"
    )
}

/// Bind a JSON value by its type; nested values are stored as JSON text
pub(super) fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        nested => query.bind(nested.to_string()),
    }
}

/// Bind a statement parameter, encoding values aimed at JSON columns
pub(super) fn bind_param<'q>(
    query: SqliteQuery<'q>,
    param: &BoundParam,
    json: &JsonColumns,
) -> SqliteQuery<'q> {
    match (&param.value, param.column.as_deref()) {
        (Value::Null, _) => query.bind(None::<String>),
        (value, Some(column)) if json.contains(column) => query.bind(value.to_string()),
        (value, _) => bind_value(query, value),
    }
}

/// Parse the stored encoding of a JSON column
///
/// Rows written before the column held JSON come back as plain strings.
fn parse_json_text(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn decode_column(row: &SqliteRow, index: usize, json: bool) -> Result<Value, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        // Booleans are stored as 0/1 and come back as integers
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
        _ if json => parse_json_text(row.try_get_unchecked::<String, _>(index)?),
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Convert a result row into a record, keeping column order
pub(super) fn row_to_record(row: &SqliteRow, json: &JsonColumns) -> StorageResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), json.contains(column.name()))
            .map_err(|e| map_sqlite_error(e, "decode row"))?;
        record.set(column.name(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_declarations() {
        assert!(is_json_declared("JSON"));
        assert!(is_json_declared(" jsonb "));
        assert!(!is_json_declared("TEXT"));
        assert!(!is_json_declared("JSON_TEXT"));
    }

    #[test]
    fn test_parse_json_text() {
        assert_eq!(parse_json_text("{\"a\":1}".to_string()), json!({"a": 1}));
        assert_eq!(parse_json_text("\"[1, 2]\"".to_string()), json!("[1, 2]"));
        assert_eq!(parse_json_text("true".to_string()), json!(true));
        assert_eq!(parse_json_text("{not json".to_string()), json!("{not json"));
    }
}
