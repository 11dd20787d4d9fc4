use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::store::{integer_field, Filter, Row, StoreError, StoreGateway, Table};

/// Name of the server-side procedure that hands out contact details.
pub const REVEAL_CONTACT_PROCEDURE: &str = "reveal_contact_info";

/// Record of a procedure invocation, kept as the server-side reveal audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug)]
struct MemoryState {
    tables: HashMap<Table, Vec<Row>>,
    unique: Vec<(Table, String)>,
    calls: Vec<ProcedureCall>,
    next_id: u64,
}

/// Process-local store used for development runs, demos and tests.
///
/// Every operation takes the single state lock, which makes increments and
/// conditional updates atomic with respect to each other.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store enforcing uniqueness of `payments.idempotency_key` and
    /// `bypass_alerts_log.report_key`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                tables: HashMap::new(),
                unique: vec![
                    (Table::Payments, "idempotency_key".to_string()),
                    (Table::BypassAlertsLog, "report_key".to_string()),
                ],
                calls: Vec::new(),
                next_id: 1,
            })),
        }
    }

    pub fn with_unique(self, table: Table, column: impl Into<String>) -> Self {
        self.lock().unique.push((table, column.into()));
        self
    }

    /// Load rows without constraint checks.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.lock();
        state.tables.entry(table).or_default().extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn procedure_calls(&self) -> Vec<ProcedureCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn check_unique(&self, table: Table, row: &Row) -> Result<(), StoreError> {
        let existing = match self.tables.get(&table) {
            Some(rows) => rows,
            None => return Ok(()),
        };

        for (unique_table, column) in &self.unique {
            if *unique_table != table {
                continue;
            }
            let Some(value) = row.get(column).filter(|value| !value.is_null()) else {
                continue;
            };
            if existing.iter().any(|other| other.get(column) == Some(value)) {
                return Err(StoreError::Duplicate {
                    table,
                    detail: format!("{column}={value}"),
                });
            }
        }
        Ok(())
    }

    fn reveal_contact(&self, args: &Value) -> Value {
        let order_id = args.get("order_id").cloned().unwrap_or(Value::Null);
        let filter = Filter::eq("id", order_id);
        let found = self
            .tables
            .get(&Table::Orders)
            .and_then(|orders| orders.iter().find(|row| filter.matches(row)));

        match found {
            Some(order) => json!([{
                "order_id": order.get("id").cloned().unwrap_or(Value::Null),
                "phone": order.get("phone").cloned().unwrap_or(Value::Null),
                "address": order.get("address").cloned().unwrap_or(Value::Null),
            }]),
            None => json!([]),
        }
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn get(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let state = self.lock();
        Ok(state
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, mut row: Row) -> Result<Row, StoreError> {
        let mut state = self.lock();
        state.check_unique(table, &row)?;

        if !row.contains_key("id") {
            let id = state.next_id;
            state.next_id += 1;
            row.insert("id".to_string(), json!(format!("{}-{id:06}", table.name())));
        }

        state.tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(&table) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            for (column, value) in &patch {
                row.insert(column.clone(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn atomic_increment(
        &self,
        table: Table,
        filter: &Filter,
        field: &str,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.lock();
        let Some(row) = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| filter.matches(row)))
        else {
            return Ok(None);
        };

        let next = integer_field(row, table, field)? + 1;
        row.insert(field.to_string(), json!(next));
        Ok(Some(next))
    }

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        let mut state = self.lock();
        let result = match name {
            REVEAL_CONTACT_PROCEDURE => state.reveal_contact(&args),
            other => return Err(StoreError::UnknownProcedure(other.to_string())),
        };

        state.calls.push(ProcedureCall {
            name: name.to_string(),
            args,
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::store::encode_row;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_enforces_unique_keys() {
        let store = MemoryStore::new();
        let first = store
            .insert(Table::Payments, row(json!({ "idempotency_key": "k1" })))
            .await
            .expect("first insert");
        assert_eq!(first.get("id"), Some(&json!("payments-000001")));

        let duplicate = store
            .insert(Table::Payments, row(json!({ "idempotency_key": "k1" })))
            .await;
        assert!(matches!(duplicate, Err(StoreError::Duplicate { .. })));
        assert_eq!(store.rows(Table::Payments).len(), 1);
    }

    #[tokio::test]
    async fn update_only_touches_matching_rows() {
        let store = MemoryStore::new();
        store.seed(
            Table::Orders,
            vec![
                row(json!({ "id": "o1", "is_paid": false })),
                row(json!({ "id": "o2", "is_paid": false })),
            ],
        );

        let updated = store
            .update(
                Table::Orders,
                &Filter::eq("id", "o2").and_eq("is_paid", false),
                row(json!({ "is_paid": true })),
            )
            .await
            .expect("update succeeds");

        assert_eq!(updated.len(), 1);
        let rows = store.rows(Table::Orders);
        assert_eq!(rows[0].get("is_paid"), Some(&json!(false)));
        assert_eq!(rows[1].get("is_paid"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn increment_reports_missing_rows() {
        let store = MemoryStore::new();
        store.seed(Table::Producers, vec![row(json!({ "id": "p1" }))]);

        let filter = Filter::eq("id", "p1");
        assert_eq!(
            store
                .atomic_increment(Table::Producers, &filter, "bypass_attempts")
                .await
                .expect("increment"),
            Some(1)
        );
        assert_eq!(
            store
                .atomic_increment(Table::Producers, &filter, "bypass_attempts")
                .await
                .expect("increment"),
            Some(2)
        );
        assert_eq!(
            store
                .atomic_increment(Table::Producers, &Filter::eq("id", "nope"), "bypass_attempts")
                .await
                .expect("increment"),
            None
        );
    }

    #[tokio::test]
    async fn reveal_procedure_is_logged() {
        let store = MemoryStore::new();
        let order = encode_row(&json!({ "id": "o1", "phone": "123", "address": "Calle 1" }))
            .expect("encodes");
        store.seed(Table::Orders, vec![order]);

        let found = store
            .call_procedure(REVEAL_CONTACT_PROCEDURE, json!({ "order_id": "o1" }))
            .await
            .expect("procedure runs");
        assert_eq!(found[0]["phone"], json!("123"));

        let missing = store
            .call_procedure(REVEAL_CONTACT_PROCEDURE, json!({ "order_id": "o9" }))
            .await
            .expect("procedure runs");
        assert_eq!(missing, json!([]));
        assert_eq!(store.procedure_calls().len(), 2);

        let unknown = store.call_procedure("drop_everything", json!({})).await;
        assert!(matches!(unknown, Err(StoreError::UnknownProcedure(_))));
    }
}
