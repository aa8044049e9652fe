//! Intake repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_core::{
    defaults, CreateMemoryRequest, Error, Intake, IntakeRepository, IntakeStats, IntakeStatus,
    NewIntake, Result, RetryDecision, RetryPolicy, StatusUpdate,
};

const INTAKE_COLUMNS: &str = "id, org_id, status, storage_path, checksum, size_bytes, \
     idempotency_key, attempts, next_retry_at, last_error, created_at, updated_at";

/// PostgreSQL implementation of IntakeRepository.
pub struct PgIntakeRepository {
    pool: Pool<Postgres>,
}

impl PgIntakeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_intake_row(row: PgRow) -> Result<Intake> {
        let status: String = row.get("status");
        Ok(Intake {
            id: row.get("id"),
            org_id: row.get("org_id"),
            status: status.parse()?,
            storage_path: row.get("storage_path"),
            checksum: row.get("checksum"),
            size_bytes: row.get("size_bytes"),
            idempotency_key: row.get("idempotency_key"),
            attempts: row.get("attempts"),
            next_retry_at: row.get("next_retry_at"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl IntakeRepository for PgIntakeRepository {
    async fn create(&self, req: NewIntake) -> Result<Intake> {
        let now = Utc::now();
        let inserted = sqlx::query(&format!(
            "INSERT INTO intakes (id, org_id, status, storage_path, checksum, size_bytes,
                                  idempotency_key, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8)
             ON CONFLICT (org_id, idempotency_key) DO NOTHING
             RETURNING {INTAKE_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&req.org_id)
        .bind(req.status.as_str())
        .bind(&req.storage_path)
        .bind(&req.checksum)
        .bind(req.size_bytes)
        .bind(req.idempotency_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(row) = inserted {
            return Self::parse_intake_row(row);
        }

        debug!(
            subsystem = "db",
            component = "intakes",
            op = "create",
            org_id = %req.org_id,
            idempotency_key = %req.idempotency_key,
            "Duplicate idempotency key, returning existing intake"
        );
        let row = sqlx::query(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes WHERE org_id = $1 AND idempotency_key = $2"
        ))
        .bind(&req.org_id)
        .bind(req.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::parse_intake_row(row)
    }

    async fn get(&self, id: Uuid, org_id: &str) -> Result<Option<Intake>> {
        let row = sqlx::query(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes WHERE id = $1 AND org_id = $2"
        ))
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_intake_row).transpose()
    }

    async fn get_ready(&self, limit: i64) -> Result<Vec<Intake>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        // A fresh intake has no next_retry_at and is due from creation.
        let rows = sqlx::query(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes
             WHERE status = 'ready' AND COALESCE(next_retry_at, created_at) <= $1
             ORDER BY COALESCE(next_retry_at, created_at) ASC, created_at ASC
             LIMIT $2"
        ))
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_intake_row).collect()
    }

    async fn claim(&self, id: Uuid, org_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE intakes SET status = 'processing', updated_at = $3
             WHERE id = $1 AND org_id = $2 AND status = 'ready'",
        )
        .bind(id)
        .bind(org_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let claimed = result.rows_affected() == 1;
        debug!(
            subsystem = "db",
            component = "intakes",
            op = "claim",
            intake_id = %id,
            claimed,
            "Claim attempted"
        );
        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: IntakeStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE intakes
             SET status = $2,
                 last_error = COALESCE($3, last_error),
                 attempts = COALESCE($4, attempts),
                 next_retry_at = COALESCE($5, next_retry_at),
                 updated_at = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&update.error)
        .bind(update.attempts)
        .bind(update.next_retry_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::IntakeNotFound(id));
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        max_attempts: i32,
        base_delay_secs: i64,
    ) -> Result<RetryDecision> {
        let now = Utc::now();
        let decision = RetryPolicy::new(max_attempts, base_delay_secs).decide(attempts, error, now);

        // Only a processing intake can fail; this keeps a late janitor sweep
        // from reopening an intake that already finished.
        let result = match &decision {
            RetryDecision::Retry {
                attempts,
                next_retry_at,
                ..
            } => {
                sqlx::query(
                    "UPDATE intakes
                     SET status = 'ready', attempts = $2, next_retry_at = $3,
                         last_error = $4, updated_at = $5
                     WHERE id = $1 AND status = 'processing'",
                )
                .bind(id)
                .bind(attempts)
                .bind(next_retry_at)
                .bind(error)
                .bind(now)
                .execute(&self.pool)
                .await
            }
            RetryDecision::Exhausted { attempts, error } => {
                sqlx::query(
                    "UPDATE intakes
                     SET status = 'failed_max_attempts', attempts = $2, next_retry_at = NULL,
                         last_error = $3, updated_at = $4
                     WHERE id = $1 AND status = 'processing'",
                )
                .bind(id)
                .bind(attempts)
                .bind(error)
                .bind(now)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            warn!(
                subsystem = "db",
                component = "intakes",
                op = "schedule_retry",
                intake_id = %id,
                "Retry not recorded: intake is not processing"
            );
            return Err(Error::InvalidInput(format!(
                "intake {} is not processing",
                id
            )));
        }

        info!(
            subsystem = "db",
            component = "intakes",
            op = "schedule_retry",
            intake_id = %id,
            attempt = decision.attempts(),
            exhausted = decision.is_exhausted(),
            "Intake failure recorded"
        );
        Ok(decision)
    }

    async fn complete(&self, id: Uuid, memory: CreateMemoryRequest) -> Result<Uuid> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO memories (id, intake_id, org_id, title, summary, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (intake_id) DO NOTHING
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(id)
        .bind(&memory.org_id)
        .bind(&memory.title)
        .bind(&memory.summary)
        .bind(&memory.metadata)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let memory_id = match inserted {
            Some(memory_id) => memory_id,
            None => sqlx::query_scalar("SELECT id FROM memories WHERE intake_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?,
        };

        let result = sqlx::query(
            "UPDATE intakes SET status = 'done', next_retry_at = NULL, updated_at = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::IntakeNotFound(id));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(memory_id)
    }

    async fn list_stale(&self, before: DateTime<Utc>) -> Result<Vec<Intake>> {
        let rows = sqlx::query(&format!(
            "SELECT {INTAKE_COLUMNS} FROM intakes
             WHERE status = 'processing' AND updated_at < $1
             ORDER BY updated_at ASC"
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_intake_row).collect()
    }

    async fn stats(&self) -> Result<IntakeStats> {
        let since = Utc::now() - chrono::Duration::hours(defaults::RECENT_ERROR_WINDOW_HOURS);
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE status = 'ready') AS ready,
                 COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                 COUNT(*) FILTER (WHERE status = 'done') AS done,
                 COUNT(*) FILTER (WHERE status = 'failed_max_attempts') AS failed_max_attempts,
                 COUNT(*) FILTER (WHERE last_error IS NOT NULL AND updated_at >= $1) AS recent_errors,
                 (SELECT COUNT(*) FROM memories) AS total_memories
             FROM intakes",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(IntakeStats {
            ready: row.get("ready"),
            processing: row.get("processing"),
            done: row.get("done"),
            failed_max_attempts: row.get("failed_max_attempts"),
            recent_errors: row.get("recent_errors"),
            total_memories: row.get("total_memories"),
        })
    }
}
