//! Backend data types
//!
//! Records travel through the storage layer as ordered JSON maps; each
//! client converts them to and from its engine's native types.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{StorageError, StorageResult};

/// Field holding the record identifier
pub const ID_FIELD: &str = "id";
/// Field holding the creation timestamp
pub const CREATED_AT_FIELD: &str = "created_at";

/// Storage engine behind a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Sqlite,
}

impl BackendKind {
    /// Stable name used in logs, migration trees and the history table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time in the record timestamp format
///
/// RFC 3339, UTC, microsecond precision and a `Z` suffix, so values sort
/// lexically in the same order as chronologically.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fresh record identifier
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A telemetry record: field name to JSON value, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a JSON map
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Create from a JSON value, which must be an object
    pub fn from_value(value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StorageError::validation(format!(
                "record must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Get string value
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get i64 value
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Get f64 value
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Get bool value, accepting the 0/1 integers SQLite hands back
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.get_str(CREATED_AT_FIELD)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Fill `id` and `created_at` when absent and return the id
    ///
    /// An `id` that is present but not a string is rejected.
    pub fn ensure_identity(&mut self) -> StorageResult<String> {
        let id = match self.0.get(ID_FIELD) {
            None | Some(Value::Null) => {
                let id = new_record_id();
                self.0.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(StorageError::validation(format!(
                    "record id must be a non-empty string, got {}",
                    json_type_name(other)
                )));
            }
        };

        if matches!(self.0.get(CREATED_AT_FIELD), None | Some(Value::Null)) {
            self.0
                .insert(CREATED_AT_FIELD.to_string(), Value::String(timestamp_now()));
        }
        Ok(id)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filters and paging for `select`
///
/// A scalar filter value means equality, an array means inclusion and `null`
/// means `IS NULL`. Results are ordered by `created_at` descending unless
/// `order_by` says otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub filters: Map<String, Value>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter on `field`
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Column and direction the results are sorted by
    pub fn ordering(&self) -> (&str, SortOrder) {
        match &self.order_by {
            Some((field, order)) => (field.as_str(), *order),
            None => (CREATED_AT_FIELD, SortOrder::Desc),
        }
    }
}
