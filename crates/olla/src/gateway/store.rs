use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// A single row exchanged with the store, keyed by column name.
pub type Row = Map<String, Value>;

/// Logical tables the trust broker reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Orders,
    Producers,
    BypassAlertsLog,
    Payments,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Orders => "orders",
            Table::Producers => "producers",
            Table::BypassAlertsLog => "bypass_alerts_log",
            Table::Payments => "payments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conjunction of column equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Evaluate the filter against a row. Missing columns compare as `null`.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            loosely_equal(actual, expected)
        })
    }
}

/// Numbers and their textual form compare equal, the same way a REST store
/// compares query-string filters against typed columns.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(text), Value::Number(number))
        | (Value::Number(number), Value::String(text)) => text.trim() == number.to_string(),
        _ => actual == expected,
    }
}

/// Failure talking to the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store transport failure: {0}")]
    Transport(String),
    #[error("store rejected {operation} with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("store payload could not be decoded: {0}")]
    Decode(String),
    #[error("duplicate row in {table}: {detail}")]
    Duplicate { table: Table, detail: String },
    #[error("column {table}.{field} does not hold an integer")]
    NotNumeric { table: Table, field: String },
    #[error("compare-and-swap on {table}.{field} gave up after {attempts} attempts")]
    Contention {
        table: Table,
        field: String,
        attempts: u32,
    },
    #[error("store procedure '{0}' is not available")]
    UnknownProcedure(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Duplicate { .. } | StoreError::Contention { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Gateway,
        }
    }
}

/// Row-level persistence contract. Implementations must be safe for concurrent use.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn get(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError>;

    /// Apply `patch` to every matching row and return the updated rows.
    async fn update(&self, table: Table, filter: &Filter, patch: Row)
        -> Result<Vec<Row>, StoreError>;

    /// Atomically add one to an integer column of the first matching row.
    /// Returns `None` when no row matches.
    async fn atomic_increment(
        &self,
        table: Table,
        filter: &Filter,
        field: &str,
    ) -> Result<Option<i64>, StoreError>;

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, StoreError>;
}

pub fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|err| StoreError::Decode(err.to_string()))
}

pub fn encode_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(StoreError::Decode(format!(
            "expected an object row, found {other}"
        ))),
        Err(err) => Err(StoreError::Decode(err.to_string())),
    }
}

/// Read an integer column, treating a missing or `null` value as zero.
pub(crate) fn integer_field(row: &Row, table: Table, field: &str) -> Result<i64, StoreError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number.as_i64().ok_or_else(|| StoreError::NotNumeric {
            table,
            field: field.to_string(),
        }),
        Some(_) => Err(StoreError::NotNumeric {
            table,
            field: field.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[test]
    fn filter_matches_numbers_against_text() {
        let order = row(json!({ "id": "42", "is_paid": false }));
        assert!(Filter::eq("id", 42).matches(&order));
        assert!(Filter::eq("id", "42").and_eq("is_paid", false).matches(&order));
        assert!(!Filter::eq("id", "43").matches(&order));
    }

    #[test]
    fn missing_columns_compare_as_null() {
        let producer = row(json!({ "id": "p1" }));
        assert!(Filter::eq("lat", Value::Null).matches(&producer));
        assert!(!Filter::eq("visible", true).matches(&producer));
        assert!(Filter::all().matches(&producer));
    }

    #[test]
    fn integer_field_defaults_to_zero() {
        let producer = row(json!({ "id": "p1", "bypass_attempts": null, "name": "x" }));
        assert_eq!(
            integer_field(&producer, Table::Producers, "bypass_attempts").expect("null is zero"),
            0
        );
        assert!(matches!(
            integer_field(&producer, Table::Producers, "name"),
            Err(StoreError::NotNumeric { .. })
        ));
    }
}
