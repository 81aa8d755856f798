//! Read access to the hosted relational store through its PostgREST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::store::StoreError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A `select` against one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableQuery {
    pub table: String,
    pub select: String,
    /// PostgREST filters, e.g. `("status", "eq.published")`
    pub filters: Vec<(String, String)>,
    /// e.g. `start_date.asc`
    pub order: Option<String>,
    pub limit: Option<u32>,
}

impl TableQuery {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            select: "*".to_owned(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns.to_owned();
        self
    }

    pub fn filter(mut self, column: &str, expr: &str) -> Self {
        self.filters.push((column.to_owned(), expr.to_owned()));
        self
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(order.to_owned());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs in PostgREST syntax.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_owned(), self.select.clone())];
        params.extend(self.filters.iter().cloned());
        if let Some(order) = &self.order {
            params.push(("order".to_owned(), order.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_owned(), limit.to_string()));
        }
        params
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Rows as a JSON array.
    async fn select(&self, query: &TableQuery) -> Result<serde_json::Value, StoreError>;
}

/// PostgREST client authenticated with the service key.
pub struct RestDataSource {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RestDataSource {
    pub fn new(client: reqwest::Client, base_url: &str, service_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            service_key: service_key.to_owned(),
        }
    }
}

#[async_trait]
impl DataSource for RestDataSource {
    async fn select(&self, query: &TableQuery) -> Result<serde_json::Value, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, query.table);
        let rows = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&query.params())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }
}

/// Stand-in used when no hosted store is configured; every query fails.
pub struct UnconfiguredDataSource;

#[async_trait]
impl DataSource for UnconfiguredDataSource {
    async fn select(&self, query: &TableQuery) -> Result<serde_json::Value, StoreError> {
        Err(StoreError::NotConfigured(format!(
            "no data source configured, cannot query '{}'",
            query.table
        )))
    }
}

/// Answers every query with the same rows and counts the calls.
#[cfg(test)]
pub struct StaticDataSource {
    rows: serde_json::Value,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl StaticDataSource {
    pub fn new(rows: serde_json::Value) -> Self {
        Self {
            rows,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl DataSource for StaticDataSource {
    async fn select(&self, _query: &TableQuery) -> Result<serde_json::Value, StoreError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.rows.clone())
    }
}
