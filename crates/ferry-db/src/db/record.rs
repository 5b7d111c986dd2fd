use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use ferry_core::models::{
    FailedObject, MigrationRecord, MigrationStatus, SourceObject, StoreStats,
};

use crate::error::{StoreError, StoreResult};

#[derive(Clone)]
pub struct MigrationRepository {
    pool: SqlitePool,
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> i64 {
    now.timestamp_millis() + lease.as_millis() as i64
}

impl MigrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the record of an object
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, object_id: &str) -> StoreResult<Option<MigrationRecord>> {
        let record = sqlx::query_as::<_, MigrationRecord>(
            "SELECT * FROM migration_records WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Create the DISCOVERED record for an object if none exists yet
    ///
    /// Returns `true` when this call created the record. Existing records are left
    /// untouched, so source metadata is immutable once recorded.
    #[tracing::instrument(skip(self, object), fields(object.id = %object.object_id))]
    pub async fn register(&self, object: &SourceObject) -> StoreResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO migration_records (
                object_id, container_id, uploader_id, created_at, name,
                mime_type, file_type, size_bytes, content_ref,
                status, discovered_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'discovered', ?, ?)
            ON CONFLICT(object_id) DO NOTHING
            "#,
        )
        .bind(&object.object_id)
        .bind(&object.container_id)
        .bind(&object.uploader_id)
        .bind(object.created_at)
        .bind(&object.name)
        .bind(&object.mime_type)
        .bind(&object.file_type)
        .bind(object.size_bytes)
        .bind(&object.content_ref)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        if created {
            tracing::debug!(object_id = %object.object_id, "Registered new migration record");
        }
        Ok(created)
    }

    /// Take exclusive ownership of a non-terminal record
    ///
    /// A single conditional UPDATE: succeeds only when the record is not terminal and
    /// is unowned or its lease has expired. A DISCOVERED record moves to DOWNLOADING.
    /// Returns the claimed record, or `None` when the claim was refused.
    #[tracing::instrument(skip(self, token))]
    pub async fn claim(
        &self,
        object_id: &str,
        token: &str,
        lease: Duration,
    ) -> StoreResult<Option<MigrationRecord>> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, MigrationRecord>(
            r#"
            UPDATE migration_records
            SET claim_token = ?,
                lease_expires_at = ?,
                status = CASE WHEN status = 'discovered' THEN 'downloading' ELSE status END,
                updated_at = ?
            WHERE object_id = ?
              AND status NOT IN ('completed', 'failed')
              AND (claim_token IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= ?)
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(lease_deadline(now, lease))
        .bind(now)
        .bind(object_id)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Persist the pipeline's view of a record it holds the claim for
    ///
    /// Also renews the lease. Terminal records drop their claim. `destination_ref` is only
    /// ever written when empty. Fails with [`StoreError::ClaimLost`] when `token` no longer
    /// owns the record.
    #[tracing::instrument(
        skip(self, record, token, lease),
        fields(object.id = %record.object_id, status = %record.status)
    )]
    pub async fn update(
        &self,
        record: &MigrationRecord,
        token: &str,
        lease: Duration,
    ) -> StoreResult<()> {
        let tags = record
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let (claim_token, lease_expires_at) = if record.status.is_terminal() {
            (None, None)
        } else {
            (Some(token), Some(lease_deadline(Utc::now(), lease)))
        };

        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET status = ?,
                download_attempts = ?,
                upload_attempts = ?,
                annotate_attempts = ?,
                destination_ref = COALESCE(destination_ref, ?),
                tags = ?,
                last_error = ?,
                claim_token = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE object_id = ?
              AND claim_token = ?
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.download_attempts)
        .bind(record.upload_attempts)
        .bind(record.annotate_attempts)
        .bind(&record.destination_ref)
        .bind(tags)
        .bind(&record.last_error)
        .bind(claim_token)
        .bind(lease_expires_at)
        .bind(record.updated_at)
        .bind(&record.object_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                object_id = %record.object_id,
                "Record update rejected, claim no longer held"
            );
            return Err(StoreError::ClaimLost {
                object_id: record.object_id.clone(),
            });
        }

        Ok(())
    }

    /// Give up a claim without changing status, leaving the record resumable
    #[tracing::instrument(skip(self, token))]
    pub async fn release(&self, object_id: &str, token: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET claim_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE object_id = ? AND claim_token = ?
            "#,
        )
        .bind(Utc::now())
        .bind(object_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clear claims whose lease ran out, typically left behind by a crashed process
    #[tracing::instrument(skip(self))]
    pub async fn release_stale_claims(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE migration_records
            SET claim_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE claim_token IS NOT NULL
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
            "#,
        )
        .bind(now)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::info!(released, "Released stale migration claims");
        }
        Ok(released)
    }

    /// Records in any of `statuses`, ordered by object id, after `after` (keyset paging)
    #[tracing::instrument(skip(self, statuses))]
    pub async fn list_by_status(
        &self,
        statuses: &[MigrationStatus],
        after: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<MigrationRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT * FROM migration_records WHERE status IN (");
        let mut separated = query.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        if let Some(after) = after {
            query.push(" AND object_id > ").push_bind(after);
        }
        query.push(" ORDER BY object_id LIMIT ").push_bind(limit);

        let records = query
            .build_query_as::<MigrationRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM migration_records GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats::default();
        for (status, count) in rows {
            match status.parse::<MigrationStatus>() {
                Ok(status) => stats.add(status, count as u64),
                Err(e) => tracing::warn!(error = %e, "Skipping unknown status in stats"),
            }
        }
        Ok(stats)
    }

    /// Most recently failed objects with their last error
    #[tracing::instrument(skip(self))]
    pub async fn failures(&self, limit: i64) -> StoreResult<Vec<FailedObject>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT object_id, last_error
            FROM migration_records
            WHERE status = 'failed'
            ORDER BY updated_at DESC, object_id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(object_id, last_error)| FailedObject {
                object_id,
                last_error,
            })
            .collect())
    }
}
