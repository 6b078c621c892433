//! SQL text generation shared by both clients
//!
//! Identifiers are validated and quoted; values never enter the SQL text and
//! are returned alongside it as bound parameters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::types::{CREATED_AT_FIELD, ID_FIELD, Record, SelectQuery};
use crate::error::{StorageError, StorageResult};

static IDENTIFIER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok());

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> StorageResult<()> {
    let valid = IDENTIFIER
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(StorageError::validation(format!(
            "invalid identifier '{}': expected [A-Za-z_][A-Za-z0-9_]{{0,62}}",
            name
        )))
    }
}

/// Quote an already validated identifier
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

/// A value bound to a placeholder, with the column it targets if any
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundParam {
    pub column: Option<String>,
    pub value: Value,
}

/// SQL text plus its parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<BoundParam>,
}

/// Renders the placeholder for the n-th parameter (1-based)
pub(crate) trait Placeholders {
    fn placeholder(&self, index: usize, column: Option<&str>) -> String;
}

/// `?` placeholders
pub(crate) struct QuestionMarks;

impl Placeholders for QuestionMarks {
    fn placeholder(&self, _index: usize, _column: Option<&str>) -> String {
        "?".to_string()
    }
}

struct Builder<'a, P: Placeholders> {
    placeholders: &'a P,
    params: Vec<BoundParam>,
}

impl<'a, P: Placeholders> Builder<'a, P> {
    fn new(placeholders: &'a P) -> Self {
        Self {
            placeholders,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, column: Option<&str>, value: Value) -> String {
        self.params.push(BoundParam {
            column: column.map(str::to_string),
            value,
        });
        self.placeholders.placeholder(self.params.len(), column)
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// Validate the table and every field name of a record
pub(crate) fn validate_record(table: &str, record: &Record) -> StorageResult<()> {
    validate_identifier(table)?;
    if record.is_empty() {
        return Err(StorageError::validation("record has no fields"));
    }
    for name in record.field_names() {
        validate_identifier(name)?;
    }
    Ok(())
}

/// `INSERT INTO "t" ("a", "b") VALUES (?, ?)`
pub(crate) fn insert<P: Placeholders>(
    placeholders: &P,
    table: &str,
    record: &Record,
) -> StorageResult<Statement> {
    validate_record(table, record)?;
    let mut builder = Builder::new(placeholders);
    let mut columns = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());

    for (name, value) in record.fields() {
        columns.push(quote(name));
        values.push(builder.bind(Some(name), value.clone()));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        columns.join(", "),
        values.join(", ")
    );
    Ok(builder.finish(sql))
}

/// `SELECT * FROM "t" WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
pub(crate) fn select<P: Placeholders>(
    placeholders: &P,
    table: &str,
    query: &SelectQuery,
) -> StorageResult<Statement> {
    validate_identifier(table)?;
    let (order_column, order) = query.ordering();
    validate_identifier(order_column)?;

    let mut builder = Builder::new(placeholders);
    let mut conditions = Vec::with_capacity(query.filters.len());

    for (column, value) in &query.filters {
        validate_identifier(column)?;
        let quoted = quote(column);
        let condition = match value {
            Value::Null => format!("{} IS NULL", quoted),
            Value::Array(items) if items.is_empty() => "1 = 0".to_string(),
            Value::Array(items) => {
                let slots: Vec<String> = items
                    .iter()
                    .map(|item| builder.bind(Some(column), item.clone()))
                    .collect();
                format!("{} IN ({})", quoted, slots.join(", "))
            }
            scalar => format!("{} = {}", quoted, builder.bind(Some(column), scalar.clone())),
        };
        conditions.push(condition);
    }

    let mut sql = format!("SELECT * FROM {}", quote(table));
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY {} {}", quote(order_column), order.as_sql()));

    // Both engines need a LIMIT before OFFSET; -1 / ALL means unbounded
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", i64::MAX, offset)),
        (None, None) => {}
    }

    Ok(builder.finish(sql))
}

/// `UPDATE "t" SET "a" = ? WHERE "id" = ?`
pub(crate) fn update<P: Placeholders>(
    placeholders: &P,
    table: &str,
    id: &str,
    patch: &Record,
) -> StorageResult<Statement> {
    validate_record(table, patch)?;
    for immutable in [ID_FIELD, CREATED_AT_FIELD] {
        if patch.contains(immutable) {
            return Err(StorageError::validation(format!(
                "field '{}' cannot be updated",
                immutable
            )));
        }
    }

    let mut builder = Builder::new(placeholders);
    let assignments: Vec<String> = patch
        .fields()
        .map(|(name, value)| {
            format!(
                "{} = {}",
                quote(name),
                builder.bind(Some(name), value.clone())
            )
        })
        .collect();
    let id_slot = builder.bind(Some(ID_FIELD), Value::String(id.to_string()));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quote(table),
        assignments.join(", "),
        quote(ID_FIELD),
        id_slot
    );
    Ok(builder.finish(sql))
}

/// `DELETE FROM "t" WHERE "id" = ?`
pub(crate) fn delete<P: Placeholders>(
    placeholders: &P,
    table: &str,
    id: &str,
) -> StorageResult<Statement> {
    validate_identifier(table)?;
    let mut builder = Builder::new(placeholders);
    let id_slot = builder.bind(Some(ID_FIELD), Value::String(id.to_string()));
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quote(table),
        quote(ID_FIELD),
        id_slot
    );
    Ok(builder.finish(sql))
}
