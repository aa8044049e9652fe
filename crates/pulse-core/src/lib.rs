//! # pulse-core
//!
//! Core types, traits, and abstractions for the pulse intake pipeline.
//!
//! This crate provides the data structures shared by every stage of the
//! pipeline (intakes, memories, entities, topics) and the trait seams behind
//! which the relational store, content store, language model, graph store and
//! vector store live.

pub mod cache;
pub mod config;
pub mod defaults;
pub mod error;
pub mod graph;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use cache::TtlCache;
pub use config::{
    CachedSecretSource, EnvSecretSource, PipelineConfig, RetryDecision, RetryPolicy,
    SecretSource, TenantSecrets,
};
pub use error::{Error, Result};
pub use graph::*;
pub use models::*;
pub use traits::*;

/// Re-export of the embedding vector type used across crates.
pub use pgvector::Vector;
