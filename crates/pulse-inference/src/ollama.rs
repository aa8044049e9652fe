//! Ollama inference backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use pulse_core::{defaults, EmbeddingBackend, Error, GenerationBackend, Result, Vector};

use crate::response::strip_thinking;

/// Ollama generation and embedding backend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
    embed_timeout: Duration,
    gen_timeout: Duration,
}

impl OllamaBackend {
    /// Backend with default endpoint and models.
    pub fn new() -> Self {
        Self::with_config(
            defaults::OLLAMA_URL,
            defaults::EMBED_MODEL,
            defaults::GEN_MODEL,
            defaults::EMBED_DIMENSION,
        )
    }

    pub fn with_config(
        base_url: impl Into<String>,
        embed_model: impl Into<String>,
        gen_model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let embed_model = embed_model.into();
        let gen_model = gen_model.into();

        info!(
            subsystem = "inference",
            component = "ollama",
            op = "init",
            url = %base_url,
            embed_model = %embed_model,
            gen_model = %gen_model,
            "Initializing Ollama backend"
        );

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(defaults::GEN_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url,
            embed_model,
            gen_model,
            dimension,
            embed_timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
            gen_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
        }
    }

    /// Environment variables:
    /// - `OLLAMA_BASE`
    /// - `OLLAMA_EMBED_MODEL`
    /// - `OLLAMA_GEN_MODEL`
    /// - `OLLAMA_EMBED_DIM`
    /// - `PULSE_GEN_TIMEOUT_SECS`, `PULSE_EMBED_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let secs = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        let dimension = std::env::var("OLLAMA_EMBED_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::EMBED_DIMENSION);

        let mut backend = Self::with_config(
            var("OLLAMA_BASE", defaults::OLLAMA_URL),
            var("OLLAMA_EMBED_MODEL", defaults::EMBED_MODEL),
            var("OLLAMA_GEN_MODEL", defaults::GEN_MODEL),
            dimension,
        );
        if let Some(timeout) = secs("PULSE_GEN_TIMEOUT_SECS") {
            backend.gen_timeout = timeout;
        }
        if let Some(timeout) = secs("PULSE_EMBED_TIMEOUT_SECS") {
            backend.embed_timeout = timeout;
        }
        backend
    }

    /// Same endpoint and embedding model, different generation model.
    pub fn with_gen_model(mut self, gen_model: impl Into<String>) -> Self {
        self.gen_model = gen_model.into();
        self
    }

    /// Same models on a different server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_gen_timeout(mut self, timeout: Duration) -> Self {
        self.gen_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the server answers its model listing endpoint.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama health check error");
                false
            }
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(self.embed_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                result.embeddings.len(),
                texts.len()
            )));
        }

        let vectors: Vec<Vector> = result.embeddings.into_iter().map(Vector::from).collect();
        debug!(
            result_count = vectors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding complete"
        );
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let start = Instant::now();

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: ChatOptions { temperature },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.gen_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = strip_thinking(&result.message.content);
        let elapsed = start.elapsed().as_millis();
        debug!(
            response_len = content.len(),
            duration_ms = elapsed as u64,
            "Generation complete"
        );
        if elapsed > defaults::SLOW_GENERATION_MS {
            warn!(
                duration_ms = elapsed as u64,
                prompt_len = prompt.len(),
                slow = true,
                "Slow generation operation"
            );
        }
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}
