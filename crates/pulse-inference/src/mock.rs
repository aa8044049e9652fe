//! Mock inference backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use pulse_inference::mock::{MockEmbeddingBackend, MockGenerationBackend};
//!
//! let llm = MockGenerationBackend::new()
//!     .with_rule("## Passage", r#"{"entities": [], "relationships": []}"#)
//!     .with_default("Weekly sync\nNothing happened.");
//! let embedder = MockEmbeddingBackend::new(64);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pulse_core::{EmbeddingBackend, Error, GenerationBackend, Result, Vector};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    reply: Reply,
}

#[derive(Debug, Clone)]
struct MockConfig {
    rules: Vec<Rule>,
    default_reply: Reply,
    latency: Duration,
    failure_rate: f64,
    model: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: Reply::Text("Mock response".to_string()),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            model: "mock-llm".to_string(),
        }
    }
}

/// A recorded generation call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub temperature: f32,
}

/// Generation backend answering from substring rules.
///
/// Rules are checked in insertion order; the first rule whose pattern occurs
/// in the prompt decides the reply.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply with `response` to prompts containing `pattern`.
    pub fn with_rule(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).rules.push(Rule {
            pattern: pattern.into(),
            reply: Reply::Text(response.into()),
        });
        self
    }

    /// Fail prompts containing `pattern` with an inference error.
    pub fn with_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).rules.push(Rule {
            pattern: pattern.into(),
            reply: Reply::Fail(message.into()),
        });
        self
    }

    /// Reply used when no rule matches.
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_reply = Reply::Text(response.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Calls whose prompt contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<MockCall> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.prompt.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        if self.config.failure_rate > 0.0 {
            rand::thread_rng().gen::<f64>() < self.config.failure_rate
        } else {
            false
        }
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.call_log.lock().unwrap().push(MockCall {
            prompt: prompt.to_string(),
            temperature,
        });
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.should_fail() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        let reply = self
            .config
            .rules
            .iter()
            .find(|rule| prompt.contains(&rule.pattern))
            .map(|rule| &rule.reply)
            .unwrap_or(&self.config.default_reply);
        match reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(message) => Err(Error::Inference(message.clone())),
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Embedding backend producing deterministic unit vectors.
#[derive(Debug, Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    calls: Arc<Mutex<usize>>,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of texts embedded so far.
    pub fn embedded_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        *self.calls.lock().unwrap() += texts.len();
        Ok(texts
            .iter()
            .map(|t| Vector::from(MockEmbeddingGenerator::generate(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Same text always produces the same normalized vector.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let backend = MockGenerationBackend::new()
            .with_rule("alpha", "first")
            .with_rule("alpha beta", "second")
            .with_default("fallback");

        assert_eq!(backend.generate("alpha beta", 0.1).await.unwrap(), "first");
        assert_eq!(backend.generate("gamma", 0.1).await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn failure_rule_returns_inference_error() {
        let backend = MockGenerationBackend::new().with_failure("boom", "model offline");
        let err = backend.generate("boom now", 0.3).await.unwrap_err();
        assert!(matches!(err, Error::Inference(ref m) if m == "model offline"));
    }

    #[tokio::test]
    async fn calls_are_logged_with_temperature() {
        let backend = MockGenerationBackend::new();
        backend.generate("one", 0.1).await.unwrap();
        backend.generate("two", 0.3).await.unwrap();

        assert_eq!(backend.call_count(), 2);
        let matching = backend.calls_matching("two");
        assert_eq!(matching.len(), 1);
        assert!((matching[0].temperature - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn full_failure_rate_always_fails() {
        let backend = MockGenerationBackend::new().with_failure_rate(1.0);
        assert!(backend.generate("x", 0.1).await.is_err());
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let backend = MockEmbeddingBackend::new(32);
        let texts = vec!["budget review".to_string(), "budget review".to_string()];
        let vectors = backend.embed_texts(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].as_slice(), vectors[1].as_slice());
        let magnitude: f32 = vectors[0].as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.01);
        assert_eq!(backend.embedded_count(), 2);
    }
}
