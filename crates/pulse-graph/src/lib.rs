//! # pulse-graph
//!
//! Knowledge graph side of the pulse pipeline.
//!
//! This crate provides:
//! - `Neo4jGraphStore` over the Neo4j HTTP transactional endpoint
//! - `InMemoryGraphStore` with identical merge semantics
//! - `KnowledgeGraphBuilder` for entity/relationship merge and topic
//!   overflow detection
//! - `TopicSummarizer` for topic summaries and finding vectors

pub mod builder;
pub mod in_memory;
pub mod neo4j;
pub mod summarizer;

pub use builder::{
    EntityMergeOutcome, KnowledgeGraphBuilder, RelationshipMergeOutcome, EVENT_COUNT,
    SPLIT_PENDING,
};
pub use in_memory::InMemoryGraphStore;
pub use neo4j::{http_base_url, Neo4jConfig, Neo4jGraphStore};
pub use summarizer::{SummaryReport, TopicSummarizer};
