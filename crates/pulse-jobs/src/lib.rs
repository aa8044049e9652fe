//! # pulse-jobs
//!
//! Background processing for pulse intakes.
//!
//! This crate provides:
//! - Sentence-aware chunking and LLM-driven entity/relationship extraction
//! - Per-tenant backend resolution with TTL caching
//! - `IntakeProcessor` for one intake: download, extract, graph merge,
//!   topic summaries, memory
//! - `IntakeWorker` with bounded concurrency, retries, a stale-lease
//!   janitor and graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pulse_jobs::{IntakeProcessor, IntakeWorker, WorkerConfig};
//!
//! let processor = IntakeProcessor::new(intakes.clone(), content, services);
//! let handle = IntakeWorker::new(intakes, processor)
//!     .with_config(WorkerConfig::from_env())
//!     .start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod chunker;
pub mod extraction;
pub mod processor;
pub mod services;
pub mod worker;

pub use chunker::chunk_text;
pub use extraction::{ChunkExtraction, ExtractionEngine, ExtractionResult};
pub use processor::{CancelSignal, IntakeProcessor, ProcessOutcome};
pub use services::{ServiceProvider, SharedServices, TenantServiceProvider, TenantServices};
pub use worker::{IntakeWorker, WorkerConfig, WorkerEvent, WorkerHandle, WorkerStatus};
