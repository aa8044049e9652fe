//! Structured logging field names for the pulse pipeline.
//!
//! All crates use these constants for structured `tracing` fields so log
//! aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), intake completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (chunks, entities, edges) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "graph", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "ollama", "neo4j", "worker", "processor", "graph_builder"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "schedule_retry", "merge_entities", "generate"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Intake UUID being operated on.
pub const INTAKE_ID: &str = "intake_id";

/// Tenant organization identifier.
pub const ORG_ID: &str = "org_id";

/// Memory UUID produced for an intake.
pub const MEMORY_ID: &str = "memory_id";

/// Canonical topic name.
pub const TOPIC: &str = "topic";

/// Attempt number of the current processing run.
pub const ATTEMPT: &str = "attempt";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks a document was split into.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of entities extracted or merged.
pub const ENTITY_COUNT: &str = "entity_count";

/// Number of relationships extracted or merged.
pub const RELATIONSHIP_COUNT: &str = "relationship_count";

/// Number of intakes or records returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Worker fields ─────────────────────────────────────────────────────────

/// Number of jobs currently running.
pub const ACTIVE_JOBS: &str = "active_jobs";

/// Configured concurrency limit.
pub const MAX_CONCURRENT: &str = "max_concurrent";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
