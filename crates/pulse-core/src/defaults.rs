//! Centralized default constants for the pulse pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; environment overrides are applied by the `from_env()`
//! constructors of the respective config types.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per chunk before extending to the next sentence end.
pub const CHUNK_SIZE: usize = 1000;

// =============================================================================
// EXTRACTION
// =============================================================================

/// Sampling temperature for entity/relationship extraction and topic
/// normalization calls.
pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Sampling temperature for document and topic summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Relationship strength assumed when the model omits or garbles it.
pub const RELATIONSHIP_STRENGTH: f64 = 0.5;

/// Title used when the model returns an empty document summary.
pub const FALLBACK_SUMMARY_TITLE: &str = "Document Summary";

/// Summary body used when the model returns an empty document summary.
pub const FALLBACK_SUMMARY_TEXT: &str = "No summary generated";

/// Focus phrase handed to the document summary prompt.
pub const SUMMARY_FOCUS: &str = "meeting or conversation";

// =============================================================================
// KNOWLEDGE GRAPH
// =============================================================================

/// Event count above which a topic is flagged for splitting.
pub const TOPIC_OVERFLOW_THRESHOLD: i64 = 50;

/// Default Neo4j database name.
pub const NEO4J_DATABASE: &str = "neo4j";

/// Timeout for a single graph store transaction.
pub const GRAPH_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Default result count for vector queries.
pub const VECTOR_TOP_K: usize = 5;

/// Namespace used when a tenant does not configure one.
pub const VECTOR_NAMESPACE: &str = "default";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model.
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Default embedding model.
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Embedding dimension of [`EMBED_MODEL`].
pub const EMBED_DIMENSION: usize = 768;

/// Timeout for embedding requests.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Timeout for generation requests.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Generation calls slower than this are logged at WARN.
pub const SLOW_GENERATION_MS: u128 = 30_000;

// =============================================================================
// WORKER
// =============================================================================

/// Seconds between polls for ready intakes.
pub const WORKER_POLL_INTERVAL_SECS: u64 = 30;

/// Maximum intakes processed concurrently by one worker.
pub const WORKER_MAX_CONCURRENT: usize = 3;

/// Upper bound on a single wait while the worker is at capacity.
pub const WORKER_CAPACITY_WAIT_SECS: u64 = 5;

/// Grace period for running jobs after shutdown is requested.
pub const WORKER_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Seconds between worker statistics log lines.
pub const WORKER_STATS_LOG_INTERVAL_SECS: u64 = 300;

/// Seconds between janitor sweeps for stale `processing` intakes.
pub const WORKER_JANITOR_INTERVAL_SECS: u64 = 60;

/// Maximum wall-clock time for processing a single intake.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RETRY
// =============================================================================

/// Attempts after which an intake is parked in `failed_max_attempts`.
pub const MAX_ATTEMPTS: i32 = 5;

/// Base delay in seconds for exponential retry backoff.
pub const BASE_RETRY_DELAY_SECS: i64 = 60;

/// Window used for the "recent errors" worker statistic.
pub const RECENT_ERROR_WINDOW_HOURS: i64 = 24;

// =============================================================================
// TENANT SECRETS
// =============================================================================

/// Lifetime of a cached tenant secret set.
pub const SECRETS_CACHE_TTL_SECS: u64 = 12 * 60 * 60;

/// Most tenants kept in a secrets or services cache at once.
pub const TENANT_CACHE_CAPACITY: usize = 1024;

// =============================================================================
// STORAGE
// =============================================================================

/// Bucket (top-level directory) holding raw intake uploads.
pub const CONTENT_BUCKET: &str = "intakes-raw";

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Maximum connections in the PostgreSQL pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections kept open.
pub const POOL_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const POOL_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds before an idle connection is closed.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_constants_are_positive() {
        assert!(MAX_ATTEMPTS > 0);
        assert!(BASE_RETRY_DELAY_SECS > 0);
    }

    #[test]
    fn capacity_wait_does_not_exceed_poll_interval() {
        assert!(WORKER_CAPACITY_WAIT_SECS <= WORKER_POLL_INTERVAL_SECS);
    }

    #[test]
    fn temperatures_are_in_range() {
        assert!((0.0..=1.0).contains(&EXTRACTION_TEMPERATURE));
        assert!((0.0..=1.0).contains(&SUMMARY_TEMPERATURE));
        assert!(EXTRACTION_TEMPERATURE < SUMMARY_TEMPERATURE);
    }
}
