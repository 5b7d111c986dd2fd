use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreResult;

/// Listing progress of one batch run key
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PageCheckpoint {
    pub run_key: String,
    /// Token of the first page not yet fully processed; `None` means the first page
    pub next_page_token: Option<String>,
    pub pages_processed: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckpointRepository {
    pool: SqlitePool,
}

impl CheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn load(&self, run_key: &str) -> StoreResult<Option<PageCheckpoint>> {
        let checkpoint = sqlx::query_as::<_, PageCheckpoint>(
            r#"
            SELECT run_key, next_page_token, pages_processed, updated_at
            FROM migration_checkpoints
            WHERE run_key = ?
            "#,
        )
        .bind(run_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkpoint)
    }

    #[tracing::instrument(skip(self))]
    pub async fn save(
        &self,
        run_key: &str,
        next_page_token: Option<&str>,
        pages_processed: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_checkpoints (run_key, next_page_token, pages_processed, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(run_key) DO UPDATE SET
                next_page_token = excluded.next_page_token,
                pages_processed = excluded.pages_processed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(run_key)
        .bind(next_page_token)
        .bind(pages_processed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(run_key, pages_processed, "Saved page checkpoint");
        Ok(())
    }

    /// Forget the checkpoint so the next run lists from the first page
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, run_key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM migration_checkpoints WHERE run_key = ?")
            .bind(run_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
