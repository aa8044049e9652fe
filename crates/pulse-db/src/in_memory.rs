//! In-process implementations of the repository and store traits.
//!
//! Used by tests and single-process development runs. Semantics match the
//! PostgreSQL implementations, including the conditional claim.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_core::{
    defaults, ContentStore, CreateMemoryRequest, EmbeddingBackend, Error, Intake,
    IntakeRepository, IntakeStats, IntakeStatus, Memory, MemoryRepository, NewIntake, Result,
    RetryDecision, RetryPolicy, StatusUpdate, VectorMatch, VectorRecord, VectorStore,
};

fn poisoned<T>(_: T) -> Error {
    Error::Internal("in-memory store lock poisoned".to_string())
}

// =============================================================================
// INTAKES AND MEMORIES
// =============================================================================

#[derive(Default)]
struct IntakeState {
    intakes: HashMap<Uuid, Intake>,
    memories: HashMap<Uuid, Memory>,
}

/// Intake and memory repository held in a mutex.
#[derive(Default, Clone)]
pub struct InMemoryIntakeStore {
    state: Arc<Mutex<IntakeState>>,
}

impl InMemoryIntakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current copy of an intake regardless of org.
    pub fn snapshot(&self, id: Uuid) -> Option<Intake> {
        self.state.lock().ok()?.intakes.get(&id).cloned()
    }

    /// Overwrite `updated_at`, e.g. to simulate a worker that died mid-job.
    pub fn backdate(&self, id: Uuid, updated_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let intake = state.intakes.get_mut(&id).ok_or(Error::IntakeNotFound(id))?;
        intake.updated_at = updated_at;
        Ok(())
    }

    pub fn memory_count(&self) -> usize {
        self.state.lock().map(|s| s.memories.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IntakeRepository for InMemoryIntakeStore {
    async fn create(&self, req: NewIntake) -> Result<Intake> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(existing) = state
            .intakes
            .values()
            .find(|i| i.org_id == req.org_id && i.idempotency_key == req.idempotency_key)
        {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let intake = Intake {
            id: Uuid::now_v7(),
            org_id: req.org_id,
            status: req.status,
            storage_path: req.storage_path,
            checksum: req.checksum,
            size_bytes: req.size_bytes,
            idempotency_key: req.idempotency_key,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        state.intakes.insert(intake.id, intake.clone());
        Ok(intake)
    }

    async fn get(&self, id: Uuid, org_id: &str) -> Result<Option<Intake>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state
            .intakes
            .get(&id)
            .filter(|i| i.org_id == org_id)
            .cloned())
    }

    async fn get_ready(&self, limit: i64) -> Result<Vec<Intake>> {
        let now = Utc::now();
        let state = self.state.lock().map_err(poisoned)?;
        let mut ready: Vec<Intake> = state
            .intakes
            .values()
            .filter(|i| {
                i.status == IntakeStatus::Ready && i.next_retry_at.unwrap_or(i.created_at) <= now
            })
            .cloned()
            .collect();
        ready.sort_by_key(|i| (i.next_retry_at.unwrap_or(i.created_at), i.created_at));
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn claim(&self, id: Uuid, org_id: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        match state.intakes.get_mut(&id) {
            Some(intake) if intake.org_id == org_id && intake.status == IntakeStatus::Ready => {
                intake.status = IntakeStatus::Processing;
                intake.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: IntakeStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let intake = state.intakes.get_mut(&id).ok_or(Error::IntakeNotFound(id))?;
        intake.status = status;
        if let Some(error) = update.error {
            intake.last_error = Some(error);
        }
        if let Some(attempts) = update.attempts {
            intake.attempts = attempts;
        }
        if let Some(next) = update.next_retry_at {
            intake.next_retry_at = Some(next);
        }
        intake.updated_at = Utc::now();
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

        let mut state = self.state.lock().map_err(poisoned)?;
        let intake = state.intakes.get_mut(&id).ok_or(Error::IntakeNotFound(id))?;
        if intake.status != IntakeStatus::Processing {
            return Err(Error::InvalidInput(format!("intake {} is not processing", id)));
        }
        match &decision {
            RetryDecision::Retry {
                attempts,
                next_retry_at,
                ..
            } => {
                intake.status = IntakeStatus::Ready;
                intake.attempts = *attempts;
                intake.next_retry_at = Some(*next_retry_at);
                intake.last_error = Some(error.to_string());
            }
            RetryDecision::Exhausted { attempts, error } => {
                intake.status = IntakeStatus::FailedMaxAttempts;
                intake.attempts = *attempts;
                intake.next_retry_at = None;
                intake.last_error = Some(error.clone());
            }
        }
        intake.updated_at = now;
        Ok(decision)
    }

    async fn complete(&self, id: Uuid, memory: CreateMemoryRequest) -> Result<Uuid> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if !state.intakes.contains_key(&id) {
            return Err(Error::IntakeNotFound(id));
        }
        let now = Utc::now();
        let memory_id = match state.memories.get(&id) {
            Some(existing) => existing.id,
            None => {
                let record = Memory {
                    id: Uuid::now_v7(),
                    intake_id: id,
                    org_id: memory.org_id,
                    title: memory.title,
                    summary: memory.summary,
                    metadata: memory.metadata,
                    created_at: now,
                };
                let memory_id = record.id;
                state.memories.insert(id, record);
                memory_id
            }
        };
        if let Some(intake) = state.intakes.get_mut(&id) {
            intake.status = IntakeStatus::Done;
            intake.next_retry_at = None;
            intake.updated_at = now;
        }
        Ok(memory_id)
    }

    async fn list_stale(&self, before: DateTime<Utc>) -> Result<Vec<Intake>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut stale: Vec<Intake> = state
            .intakes
            .values()
            .filter(|i| i.status == IntakeStatus::Processing && i.updated_at < before)
            .cloned()
            .collect();
        stale.sort_by_key(|i| i.updated_at);
        Ok(stale)
    }

    async fn stats(&self) -> Result<IntakeStats> {
        let since = Utc::now() - chrono::Duration::hours(defaults::RECENT_ERROR_WINDOW_HOURS);
        let state = self.state.lock().map_err(poisoned)?;
        let mut stats = IntakeStats {
            total_memories: state.memories.len() as i64,
            ..Default::default()
        };
        for intake in state.intakes.values() {
            match intake.status {
                IntakeStatus::Ready => stats.ready += 1,
                IntakeStatus::Processing => stats.processing += 1,
                IntakeStatus::Done => stats.done += 1,
                IntakeStatus::FailedMaxAttempts => stats.failed_max_attempts += 1,
                IntakeStatus::Initialized | IntakeStatus::Uploading => {}
            }
            if intake.last_error.is_some() && intake.updated_at >= since {
                stats.recent_errors += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl MemoryRepository for InMemoryIntakeStore {
    async fn get_for_intake(&self, intake_id: Uuid) -> Result<Option<Memory>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.memories.get(&intake_id).cloned())
    }

    async fn list_for_org(&self, org_id: &str, limit: i64) -> Result<Vec<Memory>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut memories: Vec<Memory> = state
            .memories
            .values()
            .filter(|m| m.org_id == org_id)
            .cloned()
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        memories.truncate(limit.max(0) as usize);
        Ok(memories)
    }
}

// =============================================================================
// CONTENT
// =============================================================================

/// Object map keyed by path.
#[derive(Default, Clone)]
pub struct InMemoryContentStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn download(&self, storage_path: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().map_err(poisoned)?;
        let key = storage_path.trim_start_matches('/');
        if let Some(data) = objects.get(key) {
            return Ok(data.clone());
        }
        let prefix = format!("{}/", key.trim_end_matches('/'));
        objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .find(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::NotFound(format!("content at '{}'", storage_path)))
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(path.trim_start_matches('/').to_string(), data.to_vec());
        Ok(())
    }
}

// =============================================================================
// VECTORS
// =============================================================================

/// Brute-force cosine similarity index.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingBackend>,
    records: RwLock<HashMap<Uuid, (VectorRecord, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            embedder,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored records, unordered.
    pub fn records(&self) -> Vec<VectorRecord> {
        self.records
            .read()
            .map(|r| r.values().map(|(rec, _)| rec.clone()).collect())
            .unwrap_or_default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        let mut store = self.records.write().map_err(poisoned)?;
        for (record, vector) in records.iter().zip(vectors) {
            store.insert(record.id, (record.clone(), vector.to_vec()));
        }
        Ok(records.len())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let query = self
            .embedder
            .embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned for query".to_string()))?
            .to_vec();
        let store = self.records.read().map_err(poisoned)?;
        let mut matches: Vec<VectorMatch> = store
            .values()
            .map(|(record, vector)| VectorMatch {
                id: record.id,
                score: cosine(&query, vector),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_for_topic(&self, topic_id: &str) -> Result<usize> {
        let mut store = self.records.write().map_err(poisoned)?;
        let before = store.len();
        store.retain(|_, (record, _)| {
            record.metadata.get("topic_id").and_then(|v| v.as_str()) != Some(topic_id)
        });
        Ok(before - store.len())
    }

    async fn replace_for_topic(
        &self,
        topic_id: &str,
        records: &[VectorRecord],
    ) -> Result<(usize, usize)> {
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_texts(&texts).await?
        };
        let mut store = self.records.write().map_err(poisoned)?;
        let before = store.len();
        store.retain(|_, (record, _)| {
            record.metadata.get("topic_id").and_then(|v| v.as_str()) != Some(topic_id)
        });
        let removed = before - store.len();
        for (record, vector) in records.iter().zip(vectors) {
            store.insert(record.id, (record.clone(), vector.to_vec()));
        }
        Ok((removed, records.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn content_prefix_resolves_direct_children_only() {
        let store = InMemoryContentStore::new();
        store.upload("org/a/intake/1/nested/z.txt", b"nested").await.unwrap();
        store.upload("org/a/intake/1/b.txt", b"b").await.unwrap();
        store.upload("org/a/intake/1/a.txt", b"a").await.unwrap();
        assert_eq!(store.download("org/a/intake/1").await.unwrap(), b"a");
        assert_eq!(store.download("org/a/intake/1/b.txt").await.unwrap(), b"b");
        assert!(store.download("org/a/intake/2").await.is_err());
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&v, &[0.0, 0.0, 0.0]), 0.0);
    }
}
