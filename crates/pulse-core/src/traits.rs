//! Core traits for pipeline abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RetryDecision;
use crate::error::Result;
use crate::graph::*;
use crate::models::*;

// =============================================================================
// INTAKE REPOSITORY
// =============================================================================

/// Typed access to intake records.
///
/// Every transition out of `ready` goes through this trait; the conditional
/// claim is what keeps concurrent workers from processing the same intake.
#[async_trait]
pub trait IntakeRepository: Send + Sync {
    /// Register an intake. A duplicate `(org_id, idempotency_key)` returns
    /// the existing record.
    async fn create(&self, req: NewIntake) -> Result<Intake>;

    /// Fetch an intake scoped to its organization.
    async fn get(&self, id: Uuid, org_id: &str) -> Result<Option<Intake>>;

    /// Ready intakes whose retry time has passed, earliest due first.
    async fn get_ready(&self, limit: i64) -> Result<Vec<Intake>>;

    /// Move an intake from `ready` to `processing`.
    ///
    /// Returns `false` when the intake is not (or no longer) ready.
    async fn claim(&self, id: Uuid, org_id: &str) -> Result<bool>;

    /// Set status and any provided fields; always bumps `updated_at`.
    async fn update_status(&self, id: Uuid, status: IntakeStatus, update: StatusUpdate)
        -> Result<()>;

    /// Record a failed attempt and either requeue with backoff or park the
    /// intake in `failed_max_attempts`.
    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        max_attempts: i32,
        base_delay_secs: i64,
    ) -> Result<RetryDecision>;

    /// Create the intake's memory and mark it `done` atomically.
    ///
    /// Idempotent on `intake_id`: an existing memory is returned unchanged.
    async fn complete(&self, id: Uuid, memory: CreateMemoryRequest) -> Result<Uuid>;

    /// Intakes stuck in `processing` since before `before`.
    async fn list_stale(&self, before: DateTime<Utc>) -> Result<Vec<Intake>>;

    /// Status counts and error totals for worker reporting.
    async fn stats(&self) -> Result<IntakeStats>;
}

/// Read access to derived memories.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Memory created for an intake, if processing completed.
    async fn get_for_intake(&self, intake_id: Uuid) -> Result<Option<Memory>>;

    /// Memories of an organization, newest first.
    async fn list_for_org(&self, org_id: &str, limit: i64) -> Result<Vec<Memory>>;
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Raw upload storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Download the content stored at `storage_path`.
    ///
    /// A directory-style path resolves to the first file beneath it.
    async fn download(&self, storage_path: &str) -> Result<Vec<u8>>;

    /// Store bytes at an exact path.
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<crate::Vector>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for `prompt` at the given sampling temperature.
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// GRAPH STORE
// =============================================================================

/// Merge-oriented property graph.
///
/// Merges are keyed on `(label, canonical name)` and fill-if-blank: a merge
/// never overwrites a non-blank property that is already set.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure a node exists. Returns `true` when it was created.
    async fn merge_node(&self, node: &NodeRef, props: &PropertyMap) -> Result<bool>;

    /// Ensure a directed edge exists between two existing nodes.
    ///
    /// Returns `true` when the edge was created. Fails with `NotFound` when
    /// either endpoint is missing.
    async fn merge_edge(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        edge: EdgeType,
        props: &PropertyMap,
    ) -> Result<bool>;

    /// Add `by` to an integer property (missing counts as zero) and return
    /// the new value.
    async fn increment(&self, node: &NodeRef, property: &str, by: i64) -> Result<i64>;

    /// Overwrite properties on an existing node.
    async fn set_properties(&self, node: &NodeRef, props: &PropertyMap) -> Result<()>;

    /// Run a read pattern.
    async fn run(&self, query: GraphQuery) -> Result<Vec<GraphRow>>;
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Semantic index over topic findings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Nearest records to `text`, best first.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Remove every record tagged with `topic_id`.
    async fn delete_for_topic(&self, topic_id: &str) -> Result<usize>;

    /// Swap the records tagged with `topic_id` for `records`.
    ///
    /// The existing records stay in place when the new ones cannot be
    /// embedded or written. Returns `(removed, written)`.
    async fn replace_for_topic(
        &self,
        topic_id: &str,
        records: &[VectorRecord],
    ) -> Result<(usize, usize)>;
}
