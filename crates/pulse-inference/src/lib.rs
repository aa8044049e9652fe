//! # pulse-inference
//!
//! Language model access for the pulse pipeline.
//!
//! This crate provides:
//! - Ollama generation and embedding backend (default feature `ollama`)
//! - Prompt builders for the extraction, topic normalization, document
//!   summary and topic summary contracts
//! - Tolerant parsing of model responses into typed results
//! - Deterministic mock backends (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse_inference::{prompts, OllamaBackend};
//! use pulse_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env();
//!     let prompt = prompts::document_summary("Alice approved the plan.", "meeting");
//!     let text = backend.generate(&prompt, 0.3).await.unwrap();
//!     println!("{}", text);
//! }
//! ```

pub mod prompts;
pub mod response;

#[cfg(feature = "ollama")]
pub mod ollama;

// Mock backends for tests here and in dependent crates
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use pulse_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

pub use response::{
    extract_json_object, parse_json_response, split_title_summary, strip_thinking, ParsedResponse,
};
