//! Query history - persisted record of every pipeline run
//!
//! Each entry carries the full response payload (generated code, result
//! JSON, dataset ids), so fetching a past query returns the complete
//! answer, not just metadata. History writes are part of the request path
//! but never fail it; the server logs a write error and still returns the
//! response. Reads back the newest first, paginated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::pipeline::QueryResponse;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub query_id: String,
    pub tenant_id: String,
    pub query_text: String,
    pub title: Option<String>,
    pub generated_code: Option<String>,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub result_rows: Option<i64>,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub datasets_used: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_response(tenant_id: &str, response: &QueryResponse) -> Self {
        Self {
            query_id: response.query_id.clone(),
            tenant_id: tenant_id.to_string(),
            query_text: response.query_text.clone(),
            title: response.title.clone(),
            generated_code: response.generated_code.clone(),
            success: response.success,
            result: response.result.clone(),
            result_rows: response.result_rows.map(|r| r as i64),
            error_message: response.error_message.clone(),
            execution_time_ms: response.execution_time_ms as i64,
            datasets_used: response.datasets_used.clone(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, entry: &HistoryRecord) -> Result<()>;

    /// Newest-first page of a tenant's history plus the total count.
    async fn list(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRecord>, i64)>;

    /// One record by id, scoped to the tenant.
    async fn fetch(&self, tenant_id: &str, query_id: &str) -> Result<HistoryRecord>;
}

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn history_from_row(row: &sqlx::postgres::PgRow) -> HistoryRecord {
    HistoryRecord {
        query_id: row.get("query_id"),
        tenant_id: row.get("tenant_id"),
        query_text: row.get("query_text"),
        title: row.get("title"),
        generated_code: row.get("generated_code"),
        success: row.get("success"),
        result: row.get("result"),
        result_rows: row.get("result_rows"),
        error_message: row.get("error_message"),
        execution_time_ms: row.get("execution_time_ms"),
        datasets_used: row.get("datasets_used"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn record(&self, entry: &HistoryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_history \
             (query_id, tenant_id, query_text, title, generated_code, success, \
              result, result_rows, error_message, execution_time_ms, datasets_used, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&entry.query_id)
        .bind(&entry.tenant_id)
        .bind(&entry.query_text)
        .bind(&entry.title)
        .bind(&entry.generated_code)
        .bind(entry.success)
        .bind(&entry.result)
        .bind(entry.result_rows)
        .bind(&entry.error_message)
        .bind(entry.execution_time_ms)
        .bind(&entry.datasets_used)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRecord>, i64)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM query_history WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let rows = sqlx::query(
            "SELECT query_id, tenant_id, query_text, title, generated_code, success, \
             result, result_rows, error_message, execution_time_ms, datasets_used, created_at \
             FROM query_history WHERE tenant_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(history_from_row).collect(), total))
    }

    async fn fetch(&self, tenant_id: &str, query_id: &str) -> Result<HistoryRecord> {
        let row = sqlx::query(
            "SELECT query_id, tenant_id, query_text, title, generated_code, success, \
             result, result_rows, error_message, execution_time_ms, datasets_used, created_at \
             FROM query_history WHERE tenant_id = $1 AND query_id = $2",
        )
        .bind(tenant_id)
        .bind(query_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(history_from_row)
            .ok_or_else(|| EngineError::NotFound(format!("query {}", query_id)))
    }
}

/// In-memory history used when no DATABASE_URL is configured.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record(&self, entry: &HistoryRecord) -> Result<()> {
        self.entries
            .lock()
            .expect("history lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn list(
        &self,
        tenant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRecord>, i64)> {
        let entries = self.entries.lock().expect("history lock poisoned");
        let mut matching: Vec<HistoryRecord> = entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn fetch(&self, tenant_id: &str, query_id: &str) -> Result<HistoryRecord> {
        let entries = self.entries.lock().expect("history lock poisoned");
        entries
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.query_id == query_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("query {}", query_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tenant: &str, id: &str) -> HistoryRecord {
        HistoryRecord {
            query_id: id.to_string(),
            tenant_id: tenant.to_string(),
            query_text: "q".to_string(),
            title: None,
            generated_code: None,
            success: true,
            result: Some(serde_json::json!({ "value": "1" })),
            result_rows: Some(1),
            error_message: None,
            execution_time_ms: 5,
            datasets_used: vec!["sales".to_string()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_pages_newest_first() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            let mut e = entry("t1", &format!("q{}", i));
            e.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.record(&e).await.unwrap();
        }
        store.record(&entry("t2", "other")).await.unwrap();

        let (page, total) = store.list("t1", 2, 1).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].query_id, "q3");
        assert_eq!(page[1].query_id, "q2");
    }

    #[tokio::test]
    async fn fetch_is_tenant_scoped() {
        let store = InMemoryHistoryStore::new();
        store.record(&entry("t1", "a")).await.unwrap();

        assert!(store.fetch("t1", "a").await.is_ok());
        let err = store.fetch("t2", "a").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
