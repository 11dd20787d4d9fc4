//! Store gateway backed by a PostgREST endpoint (`/rest/v1/{table}`, `/rest/v1/rpc/{name}`).
//!
//! PostgREST has no increment primitive, so [`StoreGateway::atomic_increment`] is an
//! optimistic compare-and-swap: read the counter, patch it guarded by the value just
//! read, and retry on a lost race up to the configured number of attempts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::retry::read_with_backoff;
use super::store::{integer_field, Filter, Row, StoreError, StoreGateway, Table};
use crate::config::RemoteStoreConfig;

const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    max_cas_attempts: u32,
}

impl PostgrestStore {
    pub fn new(config: &RemoteStoreConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| StoreError::Transport("store key contains invalid characters".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| StoreError::Transport("store key contains invalid characters".into()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|err| StoreError::Transport(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_cas_attempts: config.max_cas_attempts.max(1),
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn procedure_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, name)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, StoreError> {
        request
            .send()
            .await
            .map_err(|err| StoreError::Transport(format!("{operation}: {err}")))
    }
}

/// Render a filter as PostgREST query pairs (`column=eq.value`, `column=is.null`).
fn query_pairs(filter: &Filter) -> Vec<(String, String)> {
    filter
        .conditions()
        .iter()
        .map(|(column, value)| {
            let rendered = match value {
                Value::Null => "is.null".to_string(),
                Value::String(text) => format!("eq.{text}"),
                other => format!("eq.{other}"),
            };
            (column.clone(), rendered)
        })
        .collect()
}

async fn check_status(
    response: Response,
    table: Option<Table>,
    operation: &str,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match (status, table) {
        (StatusCode::CONFLICT, Some(table)) => Err(StoreError::Duplicate {
            table,
            detail: body,
        }),
        _ => Err(StoreError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        }),
    }
}

async fn read_rows(
    response: Response,
    table: Table,
    operation: &str,
) -> Result<Vec<Row>, StoreError> {
    check_status(response, Some(table), operation)
        .await?
        .json::<Vec<Row>>()
        .await
        .map_err(|err| StoreError::Decode(format!("{operation}: {err}")))
}

#[async_trait]
impl StoreGateway for PostgrestStore {
    async fn get(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let operation = format!("select {table}");
        let url = self.table_url(table);
        let mut query = query_pairs(filter);
        query.push(("select".to_string(), "*".to_string()));

        let response =
            read_with_backoff(&operation, || self.client.get(&url).query(&query).send()).await?;
        read_rows(response, table, &operation).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        let operation = format!("insert {table}");
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&row);
        let response = self.send(request, &operation).await?;

        read_rows(response, table, &operation)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode(format!("{operation}: empty representation")))
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let operation = format!("update {table}");
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&query_pairs(filter))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&patch);
        let response = self.send(request, &operation).await?;
        read_rows(response, table, &operation).await
    }

    async fn atomic_increment(
        &self,
        table: Table,
        filter: &Filter,
        field: &str,
    ) -> Result<Option<i64>, StoreError> {
        for attempt in 1..=self.max_cas_attempts {
            let Some(current_row) = self.get(table, filter).await?.into_iter().next() else {
                return Ok(None);
            };

            let current = integer_field(&current_row, table, field)?;
            let expected = match current_row.get(field) {
                None | Some(Value::Null) => Value::Null,
                Some(_) => json!(current),
            };
            let guarded = filter.clone().and_eq(field, expected);

            let mut patch = Row::new();
            patch.insert(field.to_string(), json!(current + 1));

            if !self.update(table, &guarded, patch).await?.is_empty() {
                return Ok(Some(current + 1));
            }
            debug!(%table, field, attempt, "lost compare-and-swap race, retrying");
        }

        Err(StoreError::Contention {
            table,
            field: field.to_string(),
            attempts: self.max_cas_attempts,
        })
    }

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        let operation = format!("rpc {name}");
        let request = self.client.post(self.procedure_url(name)).json(&args);
        let response = self.send(request, &operation).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::UnknownProcedure(name.to_string()));
        }

        check_status(response, None, &operation)
            .await?
            .json::<Value>()
            .await
            .map_err(|err| StoreError::Decode(format!("{operation}: {err}")))
    }
}
