//! PostgreSQL pool setup and schema bootstrap

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

/// Connect and make sure the tables exist.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    ensure_schema(&pool).await?;
    info!("Connected to PostgreSQL");
    Ok(pool)
}

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_format TEXT NOT NULL DEFAULT 'csv',
            uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_used_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_history (
            query_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            query_text TEXT NOT NULL,
            title TEXT,
            generated_code TEXT,
            success BOOLEAN NOT NULL,
            result JSONB,
            result_rows BIGINT,
            error_message TEXT,
            execution_time_ms BIGINT NOT NULL,
            datasets_used TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_query_history_tenant ON query_history (tenant_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
