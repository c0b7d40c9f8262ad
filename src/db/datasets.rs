//! PostgreSQL-backed dataset catalog

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::path::PathBuf;

use crate::catalog::{DatasetCatalog, DatasetRecord, FileFormat};
use crate::error::Result;

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> DatasetRecord {
    let id: String = row.get("id");
    let original_filename: String = row.get("original_filename");
    let file_path: String = row.get("file_path");
    let file_format: String = row.get("file_format");

    DatasetRecord {
        id,
        original_filename,
        file_path: PathBuf::from(file_path),
        file_format: match file_format.as_str() {
            "parquet" => FileFormat::Parquet,
            _ => FileFormat::Csv,
        },
    }
}

#[async_trait]
impl DatasetCatalog for PgCatalog {
    async fn list_datasets(
        &self,
        tenant_id: &str,
        dataset_ids: Option<&[String]>,
    ) -> Result<Vec<DatasetRecord>> {
        let rows = match dataset_ids {
            Some(ids) => {
                sqlx::query(
                    "SELECT id, original_filename, file_path, file_format \
                     FROM datasets WHERE tenant_id = $1 AND id = ANY($2) \
                     ORDER BY uploaded_at",
                )
                .bind(tenant_id)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, original_filename, file_path, file_format \
                     FROM datasets WHERE tenant_id = $1 ORDER BY uploaded_at",
                )
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn mark_used(&self, dataset_id: &str) -> Result<()> {
        sqlx::query("UPDATE datasets SET last_used_at = NOW() WHERE id = $1")
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
