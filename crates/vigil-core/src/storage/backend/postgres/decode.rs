//! Value conversion between JSON records and PostgreSQL

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use std::collections::HashMap;

use super::errors::map_pg_error;
use crate::error::{StorageError, StorageResult};
use crate::storage::backend::sql::{BoundParam, Placeholders, validate_identifier};
use crate::storage::backend::types::Record;

pub(super) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Column name to `udt_name` for one table
pub(super) type ColumnTypes = HashMap<String, String>;

/// `$n` placeholders cast to the target column's type
pub(super) struct TypedPlaceholders<'a> {
    pub types: &'a ColumnTypes,
}

impl Placeholders for TypedPlaceholders<'_> {
    fn placeholder(&self, index: usize, column: Option<&str>) -> String {
        match column.and_then(|c| self.types.get(c)) {
            Some(udt) if validate_identifier(udt).is_ok() => format!("${}::\"{}\"", index, udt),
            _ => format!("${}", index),
        }
    }
}

fn is_json_type(udt: &str) -> bool {
    matches!(udt, "json" | "jsonb")
}

/// Text form of a value for a cast placeholder
///
/// The server parses the text into the column type, so nested values reach
/// `jsonb` columns natively and arrays reach array columns as array literals.
pub(super) fn text_for_column(value: &Value, udt: Option<&str>) -> Option<String> {
    match (value, udt) {
        (Value::Null, _) => None,
        (v, Some(udt)) if is_json_type(udt) => Some(v.to_string()),
        (Value::Array(items), Some(udt)) if udt.starts_with('_') => Some(array_literal(items)),
        (Value::String(s), _) => Some(s.clone()),
        (Value::Bool(b), _) => Some(b.to_string()),
        (Value::Number(n), _) => Some(n.to_string()),
        (v @ (Value::Array(_) | Value::Object(_)), _) => Some(v.to_string()),
    }
}

fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            other => format!("\"{}\"", other.to_string().replace('\\', "\\\\").replace('"', "\\\"")),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

/// Bind a parameter whose placeholder carries a cast
pub(super) fn bind_typed<'q>(
    query: PgQuery<'q>,
    param: &BoundParam,
    types: &ColumnTypes,
) -> PgQuery<'q> {
    let udt = param.column.as_deref().and_then(|c| types.get(c)).map(String::as_str);
    query.bind(text_for_column(&param.value, udt))
}

/// Bind a parameter with no known target column, by its JSON type
pub(super) fn bind_native<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        nested => query.bind(sqlx::types::Json(nested.clone())),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "OID" => row
            .try_get::<Option<sqlx::postgres::types::Oid>, _>(index)?
            .map(|oid| Value::from(oid.0)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|f| Value::from(f as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|ts| Value::String(format_timestamp(ts))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|d| Value::String(d.to_string())),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(|bytes| {
            Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(index)?
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        // TEXT, VARCHAR, BPCHAR, NAME, CITEXT and enums arrive as strings
        _ => row.try_get::<Option<String>, _>(index)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Convert a result row into a record, keeping column order
pub(super) fn row_to_record(row: &PgRow) -> StorageResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let type_name = column.type_info().name().to_string();
        let value = decode_column(row, column.ordinal(), &type_name).map_err(|e| match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Serialization(format!(
                    "column '{}' has type {} which cannot be read as JSON; cast it in SQL",
                    column.name(),
                    type_name
                ))
            }
            other => map_pg_error(other, "decode row"),
        })?;
        record.set(column.name(), value);
    }
    Ok(record)
}
