//! pgvector-backed vector store for topic findings.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use pulse_core::{
    EmbeddingBackend, Error, Result, Vector, VectorMatch, VectorRecord, VectorStore,
};

/// Vector store over the `topic_vectors` table, scoped to one namespace.
///
/// Texts are embedded with the configured backend on the way in and for
/// queries; similarity is cosine distance.
pub struct PgVectorStore {
    pool: Pool<Postgres>,
    embedder: Arc<dyn EmbeddingBackend>,
    namespace: String,
}

impl PgVectorStore {
    pub fn new(
        pool: Pool<Postgres>,
        embedder: Arc<dyn EmbeddingBackend>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            embedder,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn topic_id_of(record: &VectorRecord) -> Option<String> {
    record
        .metadata
        .get("topic_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl PgVectorStore {
    async fn embed(&self, records: &[VectorRecord]) -> Result<Vec<Vector>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        if vectors.len() != records.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                records.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn write_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &[VectorRecord],
        vectors: Vec<Vector>,
    ) -> Result<()> {
        let now = Utc::now();
        for (record, vector) in records.iter().zip(vectors) {
            sqlx::query(
                "INSERT INTO topic_vectors (id, namespace, topic_id, text, metadata, embedding, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO UPDATE
                 SET topic_id = EXCLUDED.topic_id, text = EXCLUDED.text,
                     metadata = EXCLUDED.metadata, embedding = EXCLUDED.embedding",
            )
            .bind(record.id)
            .bind(&self.namespace)
            .bind(topic_id_of(record))
            .bind(&record.text)
            .bind(&record.metadata)
            .bind(&vector)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, records), fields(subsystem = "db", component = "vectors", op = "upsert", namespace = %self.namespace, count = records.len()))]
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let vectors = self.embed(records).await?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.write_tx(&mut tx, records, vectors).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(count = records.len(), "Vector records upserted");
        Ok(records.len())
    }

    #[instrument(skip(self, text), fields(subsystem = "db", component = "vectors", op = "query", namespace = %self.namespace))]
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let vector = self
            .embedder
            .embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned for query".to_string()))?;

        let rows = sqlx::query(
            "SELECT id, text, metadata, (1 - (embedding <=> $1))::real AS score
             FROM topic_vectors
             WHERE namespace = $2
             ORDER BY embedding <=> $1
             LIMIT $3",
        )
        .bind(&vector)
        .bind(&self.namespace)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| VectorMatch {
                id: row.get("id"),
                score: row.get("score"),
                text: row.get("text"),
                metadata: row.get("metadata"),
            })
            .collect())
    }

    async fn delete_for_topic(&self, topic_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM topic_vectors WHERE namespace = $1 AND topic_id = $2")
            .bind(&self.namespace)
            .bind(topic_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, records), fields(subsystem = "db", component = "vectors", op = "replace_for_topic", namespace = %self.namespace, count = records.len()))]
    async fn replace_for_topic(
        &self,
        topic_id: &str,
        records: &[VectorRecord],
    ) -> Result<(usize, usize)> {
        // Embed first; a failure must leave the topic's records untouched.
        let vectors = self.embed(records).await?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let removed = sqlx::query("DELETE FROM topic_vectors WHERE namespace = $1 AND topic_id = $2")
            .bind(&self.namespace)
            .bind(topic_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected() as usize;
        self.write_tx(&mut tx, records, vectors).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(removed, written = records.len(), "Topic vector records replaced");
        Ok((removed, records.len()))
    }
}
