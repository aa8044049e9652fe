//! Memory repository implementation.
//!
//! Memories are only ever written by [`crate::PgIntakeRepository::complete`],
//! which keeps them in lockstep with the intake's `done` status.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use pulse_core::{Error, Memory, MemoryRepository, Result};

const MEMORY_COLUMNS: &str = "id, intake_id, org_id, title, summary, metadata, created_at";

/// PostgreSQL implementation of MemoryRepository.
pub struct PgMemoryRepository {
    pool: Pool<Postgres>,
}

impl PgMemoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_memory_row(row: PgRow) -> Memory {
        Memory {
            id: row.get("id"),
            intake_id: row.get("intake_id"),
            org_id: row.get("org_id"),
            title: row.get("title"),
            summary: row.get("summary"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl MemoryRepository for PgMemoryRepository {
    async fn get_for_intake(&self, intake_id: Uuid) -> Result<Option<Memory>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE intake_id = $1"
        ))
        .bind(intake_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_memory_row))
    }

    async fn list_for_org(&self, org_id: &str, limit: i64) -> Result<Vec<Memory>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE org_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(org_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_memory_row).collect())
    }
}
