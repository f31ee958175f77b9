use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::debug;

use crate::{
    storage::QueueStorage,
    types::JobId,
    JobEnvelope, JobOutcome, QueueError, QueueResult, RecoveryStrategy,
};

/// DDL for the backing relation, published for the host's schema-migration
/// facility; the storage itself only issues DML
pub const JOBS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_name TEXT NOT NULL,
    channel TEXT NOT NULL,
    payload BYTEA NOT NULL,
    recovery_strategy JSONB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    reserved BOOLEAN NOT NULL DEFAULT FALSE,
    reserved_at TIMESTAMPTZ,
    queued_at TIMESTAMPTZ NOT NULL,
    backoff_until TIMESTAMPTZ,
    backoff_seconds INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS jobs_dequeue_idx ON jobs (channel, reserved, queued_at);
"#;

const DEQUEUE_SQL: &str = r#"
SELECT id, job_name, channel, payload, recovery_strategy, attempts,
       queued_at, backoff_until, backoff_seconds
FROM jobs
WHERE channel = $1
  AND reserved = FALSE
  AND (backoff_until IS NULL OR backoff_until < NOW())
ORDER BY queued_at ASC
LIMIT 1
FOR UPDATE SKIP LOCKED
"#;

/// PostgreSQL-backed storage sharing the application's database
///
/// The dequeue path runs a row-locking read with skip-locked semantics and
/// the reservation update inside one transaction, so two workers racing on
/// the same row never both win: the database's row lock is the
/// mutual-exclusion primitive. If the transaction aborts between the two
/// statements, no row is mutated and the job stays pending.
///
/// Known limitation: a worker that crashes after committing a reservation
/// but before calling `complete` leaves the row permanently reserved; there
/// is no reservation-timeout sweeper.
pub struct SqlStorage {
    pool: PgPool,
}

impl SqlStorage {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn envelope_from_row(row: &PgRow) -> QueueResult<JobEnvelope> {
        let attempts: i32 = row.try_get("attempts")?;
        let backoff_seconds: i32 = row.try_get("backoff_seconds")?;
        let recovery: Json<RecoveryStrategy> = row.try_get("recovery_strategy")?;

        Ok(JobEnvelope {
            id: JobId::from(row.try_get::<String, _>("id")?),
            payload: row.try_get("payload")?,
            job_type_name: row.try_get("job_name")?,
            channel: row.try_get("channel")?,
            attempts: attempts.max(0) as u32,
            recovery_strategy: recovery.0,
            retry_backoff_seconds: backoff_seconds.max(0) as u32,
            backoff_until: row.try_get::<Option<DateTime<Utc>>, _>("backoff_until")?,
            queued_at: row.try_get("queued_at")?,
        })
    }
}

#[async_trait]
impl QueueStorage for SqlStorage {
    async fn enqueue(&self, envelope: JobEnvelope) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_name, channel, payload, recovery_strategy,
                              attempts, reserved, queued_at, backoff_until, backoff_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8, $9)
            "#,
        )
        .bind(envelope.id.as_str())
        .bind(&envelope.job_type_name)
        .bind(&envelope.channel)
        .bind(&envelope.payload)
        .bind(Json(envelope.recovery_strategy))
        .bind(envelope.attempts as i32)
        .bind(envelope.queued_at)
        .bind(envelope.backoff_until)
        .bind(envelope.retry_backoff_seconds as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn dequeue(&self, channel: &str) -> QueueResult<Option<JobEnvelope>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(DEQUEUE_SQL)
            .bind(channel)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let envelope = Self::envelope_from_row(&row)?;

        sqlx::query("UPDATE jobs SET reserved = TRUE, reserved_at = NOW() WHERE id = $1 AND channel = $2")
            .bind(envelope.id.as_str())
            .bind(&envelope.channel)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(job_id = %envelope.id, channel = %channel, "Reserved job row");
        Ok(Some(envelope))
    }

    async fn complete(&self, envelope: &JobEnvelope, outcome: JobOutcome) -> QueueResult<()> {
        match outcome {
            JobOutcome::Success | JobOutcome::Failed => {
                sqlx::query("DELETE FROM jobs WHERE id = $1 AND channel = $2")
                    .bind(envelope.id.as_str())
                    .bind(&envelope.channel)
                    .execute(&self.pool)
                    .await?;
            }
            JobOutcome::Retry => {
                // Release the reservation and re-arm backoff in one statement
                let updated = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET payload = $3, recovery_strategy = $4, attempts = $5,
                        reserved = FALSE, reserved_at = NULL,
                        backoff_until = $6, backoff_seconds = $7
                    WHERE id = $1 AND channel = $2
                    "#,
                )
                .bind(envelope.id.as_str())
                .bind(&envelope.channel)
                .bind(&envelope.payload)
                .bind(Json(envelope.recovery_strategy))
                .bind(envelope.attempts as i32)
                .bind(envelope.backoff_until)
                .bind(envelope.retry_backoff_seconds as i32)
                .execute(&self.pool)
                .await?;

                if updated.rows_affected() == 0 {
                    return Err(QueueError::JobNotFound(envelope.id.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn shutdown(&self) -> QueueResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

// Run with a live server: DATABASE_URL=postgres://... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> SqlStorage {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for SQL tests");
        let storage = SqlStorage::connect(&url).await.unwrap();
        sqlx::raw_sql(JOBS_TABLE_DDL).execute(storage.pool()).await.unwrap();
        storage
    }

    fn envelope_on(channel: &str) -> JobEnvelope {
        JobEnvelope::new(
            b"{}".to_vec(),
            "test_job".to_string(),
            channel.to_string(),
            RecoveryStrategy::Retry { max_attempts: 3 },
            0,
        )
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server"]
    async fn test_enqueue_dequeue_roundtrip() {
        let storage = storage().await;
        let envelope = envelope_on("sql_roundtrip");
        let id = envelope.id.clone();

        storage.enqueue(envelope).await.unwrap();

        let dequeued = storage.dequeue("sql_roundtrip").await.unwrap().unwrap();
        assert_eq!(dequeued.id, id);
        assert_eq!(dequeued.attempts, 0);

        // Reserved rows are invisible to a second dequeue
        assert!(storage.dequeue("sql_roundtrip").await.unwrap().is_none());

        storage.complete(&dequeued, JobOutcome::Success).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server"]
    async fn test_retry_releases_reservation() {
        let storage = storage().await;
        storage.enqueue(envelope_on("sql_retry")).await.unwrap();

        let mut working = storage.dequeue("sql_retry").await.unwrap().unwrap();
        working.attempts += 1;
        storage.complete(&working, JobOutcome::Retry).await.unwrap();

        let again = storage.dequeue("sql_retry").await.unwrap().unwrap();
        assert_eq!(again.id, working.id);
        assert_eq!(again.attempts, 1);

        storage.complete(&again, JobOutcome::Failed).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server"]
    async fn test_backoff_hides_row() {
        let storage = storage().await;
        storage.enqueue(envelope_on("sql_backoff")).await.unwrap();

        let mut working = storage.dequeue("sql_backoff").await.unwrap().unwrap();
        working.attempts += 1;
        working.backoff_until = Some(Utc::now() + chrono::Duration::seconds(120));
        storage.complete(&working, JobOutcome::Retry).await.unwrap();

        assert!(storage.dequeue("sql_backoff").await.unwrap().is_none());

        storage.complete(&working, JobOutcome::Failed).await.unwrap();
    }
}
